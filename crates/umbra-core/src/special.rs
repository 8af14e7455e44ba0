//! Zero-order Bessel function of the first kind.
//!
//! $J_0$ is evaluated with two branches:
//!
//! - $|x| < 12$: the ascending series
//!   $J_0(x) = \sum_k (-1)^k (x^2/4)^k / (k!)^2$, whose largest term stays
//!   below $10^4$ on this interval so cancellation costs at most four digits.
//! - $|x| \geq 12$: the Hankel asymptotic expansion
//!   $J_0(x) \approx \sqrt{2/(\pi x)}\,[P(x)\cos\omega - Q(x)\sin\omega]$,
//!   $\omega = x - \pi/4$, truncated at its smallest term.
//!
//! # Reference
//! NIST Digital Library of Mathematical Functions, §10.8 and §10.17.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Below this argument the ascending series is used.
const SERIES_LIMIT: f64 = 12.0;

/// Above this argument the phase `x - π/4` can no longer be resolved to
/// eight significant digits in double precision (2^26).
pub const PHASE_PRECISION_LIMIT: f64 = 67_108_864.0;

const MAX_SERIES_TERMS: usize = 80;
const MAX_ASYMPTOTIC_TERMS: usize = 40;
const TERM_FLOOR: f64 = 1e-17;

/// Whether an evaluation ran on a full-accuracy branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Full,
    Degraded,
}

/// $J_0(x)$. Exactly `1.0` at the origin.
pub fn bessel_j0(x: f64) -> f64 {
    bessel_j0_checked(x).0
}

/// $J_0(x)$ together with the accuracy of the branch that produced it.
pub fn bessel_j0_checked(x: f64) -> (f64, Accuracy) {
    let ax = x.abs();
    if ax == 0.0 {
        return (1.0, Accuracy::Full);
    }
    if !ax.is_finite() {
        let value = if ax.is_nan() { f64::NAN } else { 0.0 };
        return (value, Accuracy::Degraded);
    }
    if ax < SERIES_LIMIT {
        return (ascending_series(ax), Accuracy::Full);
    }
    (hankel_asymptotic(ax), argument_accuracy(ax))
}

/// Accuracy class of an argument without evaluating the function.
pub fn argument_accuracy(x: f64) -> Accuracy {
    if x.abs() > PHASE_PRECISION_LIMIT || !x.is_finite() {
        Accuracy::Degraded
    } else {
        Accuracy::Full
    }
}

fn ascending_series(x: f64) -> f64 {
    let q = 0.25 * x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..MAX_SERIES_TERMS {
        let kf = k as f64;
        term *= -q / (kf * kf);
        sum += term;
        if term.abs() < TERM_FLOOR {
            break;
        }
    }
    sum
}

fn hankel_asymptotic(x: f64) -> f64 {
    // t_k = a_k(0) / x^k with a_k(0) = (-1)^k [1·9·25···(2k-1)²] / (k! 8^k)
    let mut p = 1.0;
    let mut q = 0.0;
    let mut term: f64 = 1.0;
    for k in 1..MAX_ASYMPTOTIC_TERMS {
        let odd = (2 * k - 1) as f64;
        let next = term * -(odd * odd) / (8.0 * k as f64 * x);
        if next.abs() >= term.abs() {
            break; // asymptotic series has started to diverge
        }
        term = next;
        let sign = if (k / 2) % 2 == 0 { 1.0 } else { -1.0 };
        if k % 2 == 0 {
            p += sign * term;
        } else {
            q += sign * term;
        }
        if term.abs() < TERM_FLOOR {
            break;
        }
    }

    let (sin_x, cos_x) = x.sin_cos();
    // cos(x - π/4) and sin(x - π/4) without forming x - π/4
    let cos_w = FRAC_1_SQRT_2 * (cos_x + sin_x);
    let sin_w = FRAC_1_SQRT_2 * (sin_x - cos_x);
    (2.0 / (PI * x)).sqrt() * (p * cos_w - q * sin_w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_origin_is_exactly_one() {
        assert_eq!(bessel_j0(0.0), 1.0);
        assert_eq!(bessel_j0(-0.0), 1.0);
    }

    #[test]
    fn test_even_function() {
        for &x in &[0.3, 4.0, 13.5, 250.0] {
            assert_eq!(bessel_j0(x), bessel_j0(-x));
        }
    }

    #[test]
    fn test_reference_values() {
        // Abramowitz & Stegun Table 9.1 / DLMF values
        let table = [
            (0.5, 0.938_469_807_240_813),
            (1.0, 0.765_197_686_557_966_6),
            (2.0, 0.223_890_779_141_235_67),
            (5.0, -0.177_596_771_314_338_3),
            (10.0, -0.245_935_764_451_348_3),
            (20.0, 0.167_024_664_340_583_1),
            (100.0, 0.019_985_850_304_223_122),
        ];
        for (x, expected) in table {
            assert_relative_eq!(bessel_j0(x), expected, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_zeros() {
        for zero in [
            2.404_825_557_695_773,
            5.520_078_110_286_311,
            8.653_727_912_911_013,
            14.930_917_708_487_786,
        ] {
            let v = bessel_j0(zero);
            assert!(v.abs() < 1e-9, "J0({zero}) = {v:e}, expected a zero");
        }
    }

    #[test]
    fn test_continuous_across_branch_switch() {
        let below = bessel_j0(SERIES_LIMIT - 1e-9);
        let above = bessel_j0(SERIES_LIMIT + 1e-9);
        assert!((below - above).abs() < 1e-8, "jump {below} vs {above}");
    }

    #[test]
    fn test_huge_argument_flagged() {
        let (value, accuracy) = bessel_j0_checked(1e9);
        assert_eq!(accuracy, Accuracy::Degraded);
        assert!(value.abs() < 1e-4);
        assert_eq!(bessel_j0_checked(50.0).1, Accuracy::Full);
        assert_eq!(bessel_j0_checked(f64::INFINITY), (0.0, Accuracy::Degraded));
    }
}
