//! Nelder-Mead simplex on the unit hypercube.
//!
//! Every trial point is projected onto `[0, 1]^n` before it is evaluated,
//! so the objective never sees a coordinate outside the free-parameter
//! bounds. Coefficients are the standard ones (reflection 1, expansion 2,
//! contraction 1/2, shrink 1/2).

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// What the last iteration did to the simplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Move {
    Reflect,
    Expand,
    ContractOutside,
    ContractInside,
    Shrink,
}

fn project(x: &mut [f64]) {
    for c in x.iter_mut() {
        *c = c.clamp(0.0, 1.0);
    }
}

/// `a + t (b - a)`, projected.
fn along(a: &[f64], b: &[f64], t: f64) -> Vec<f64> {
    let mut out: Vec<f64> = a.iter().zip(b).map(|(&a, &b)| a + t * (b - a)).collect();
    project(&mut out);
    out
}

#[derive(Debug, Clone)]
pub(crate) struct Simplex {
    vertices: Vec<Vec<f64>>,
    values: Vec<f64>,
}

impl Simplex {
    /// Build the start simplex around `start`, offsetting one coordinate per
    /// vertex by `step` (towards the interior when the step would leave
    /// the cube), and evaluate every vertex.
    pub fn new<F, E>(start: &[f64], step: f64, f: &mut F) -> Result<Self, E>
    where
        F: FnMut(&[f64]) -> Result<f64, E>,
    {
        let mut origin = start.to_vec();
        project(&mut origin);

        let mut vertices = vec![origin.clone()];
        for i in 0..origin.len() {
            let mut v = origin.clone();
            v[i] = if v[i] + step <= 1.0 { v[i] + step } else { v[i] - step };
            project(&mut v);
            vertices.push(v);
        }

        let values = vertices.iter().map(|v| f(v.as_slice())).collect::<Result<Vec<_>, E>>()?;
        let mut simplex = Self { vertices, values };
        simplex.order();
        Ok(simplex)
    }

    /// Sort vertices by value, best first. Ties keep their previous order.
    fn order(&mut self) {
        let mut index: Vec<usize> = (0..self.values.len()).collect();
        index.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        self.vertices = index.iter().map(|&i| self.vertices[i].clone()).collect();
        self.values = index.iter().map(|&i| self.values[i]).collect();
    }

    pub fn best(&self) -> (&[f64], f64) {
        (&self.vertices[0], self.values[0])
    }

    /// Difference between the worst and the best objective value.
    pub fn value_spread(&self) -> f64 {
        self.values[self.values.len() - 1] - self.values[0]
    }

    /// Largest max-norm distance of any vertex from the best vertex.
    pub fn diameter(&self) -> f64 {
        let best = &self.vertices[0];
        self.vertices[1..]
            .iter()
            .map(|v| {
                v.iter()
                    .zip(best)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max)
            })
            .fold(0.0, f64::max)
    }

    /// One Nelder-Mead iteration.
    pub fn iterate<F, E>(&mut self, f: &mut F) -> Result<Move, E>
    where
        F: FnMut(&[f64]) -> Result<f64, E>,
    {
        let n = self.vertices.len() - 1;
        let worst = self.vertices[n].clone();
        let f_best = self.values[0];
        let f_second = self.values[n - 1];
        let f_worst = self.values[n];

        let mut centroid = vec![0.0; worst.len()];
        for v in &self.vertices[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }

        let reflected = along(&centroid, &worst, -REFLECTION);
        let f_reflected = f(reflected.as_slice())?;

        let kind = if f_reflected < f_best {
            let expanded = along(&centroid, &reflected, EXPANSION);
            let f_expanded = f(expanded.as_slice())?;
            if f_expanded < f_reflected {
                self.replace_worst(expanded, f_expanded);
                Move::Expand
            } else {
                self.replace_worst(reflected, f_reflected);
                Move::Reflect
            }
        } else if f_reflected < f_second {
            self.replace_worst(reflected, f_reflected);
            Move::Reflect
        } else {
            let (contracted, kind, threshold) = if f_reflected < f_worst {
                (along(&centroid, &reflected, CONTRACTION), Move::ContractOutside, f_reflected)
            } else {
                (along(&centroid, &worst, CONTRACTION), Move::ContractInside, f_worst)
            };
            let f_contracted = f(contracted.as_slice())?;
            if f_contracted < threshold {
                self.replace_worst(contracted, f_contracted);
                kind
            } else {
                let best = self.vertices[0].clone();
                for i in 1..=n {
                    let shrunk = along(&best, &self.vertices[i], SHRINK);
                    self.values[i] = f(shrunk.as_slice())?;
                    self.vertices[i] = shrunk;
                }
                Move::Shrink
            }
        };

        self.order();
        Ok(kind)
    }

    fn replace_worst(&mut self, vertex: Vec<f64>, value: f64) {
        let n = self.vertices.len() - 1;
        self.vertices[n] = vertex;
        self.values[n] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn quadratic(target: Vec<f64>) -> impl FnMut(&[f64]) -> Result<f64, Infallible> {
        move |x| Ok(x.iter().zip(&target).map(|(a, b)| (a - b) * (a - b)).sum())
    }

    #[test]
    fn test_finds_interior_minimum() {
        let mut f = quadratic(vec![0.3, 0.7]);
        let mut simplex = Simplex::new(&[0.9, 0.1], 0.1, &mut f).unwrap();
        for _ in 0..200 {
            simplex.iterate(&mut f).unwrap();
        }
        let (x, value) = simplex.best();
        assert!((x[0] - 0.3).abs() < 1e-4 && (x[1] - 0.7).abs() < 1e-4, "{x:?}");
        assert!(value < 1e-8);
        assert!(simplex.diameter() < 1e-4);
    }

    #[test]
    fn test_minimum_outside_cube_lands_on_boundary() {
        let mut f = quadratic(vec![1.5]);
        let mut simplex = Simplex::new(&[0.2], 0.1, &mut f).unwrap();
        for _ in 0..100 {
            simplex.iterate(&mut f).unwrap();
        }
        let (x, _) = simplex.best();
        assert_eq!(x[0], 1.0);
    }

    #[test]
    fn test_start_step_turns_inward_at_upper_bound() {
        let mut seen = Vec::new();
        let mut f = |x: &[f64]| {
            seen.push(x.to_vec());
            Ok::<_, Infallible>(x[0])
        };
        Simplex::new(&[0.95], 0.1, &mut f).unwrap();
        assert_eq!(seen.len(), 2);
        assert!((seen[1][0] - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_error_propagates() {
        let mut calls = 0;
        let mut f = |x: &[f64]| {
            calls += 1;
            if calls > 3 {
                Err("boom")
            } else {
                Ok(x[0])
            }
        };
        let mut simplex = Simplex::new(&[0.5], 0.1, &mut f).unwrap();
        let mut result = Ok(Move::Reflect);
        for _ in 0..5 {
            result = simplex.iterate(&mut f);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err("boom"));
    }
}
