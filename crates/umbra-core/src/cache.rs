//! Per-depth OPD samples over the pupil radius.
//!
//! The OPD depends on the voxel only through its axial offset $z_o$, so the
//! synthesiser evaluates it once per depth on a fixed $\rho$ grid and reuses
//! the samples for every voxel in that slice. Alongside the raw OPD it keeps
//! the voxel-independent part of the Simpson sum, `w_i rho_i exp(i k W_i) h/3`,
//! so the per-voxel quadrature only multiplies in the Bessel factor. A cache
//! is owned by a single worker and is never shared between threads.

use num_complex::Complex64;

use crate::opd::OpdModel;

/// Evaluate the OPD on `intervals + 1` equally spaced nodes of `rho ∈ [0, 1]`.
pub fn precompute_opd_terms(model: &OpdModel, z_o_nm: f64, intervals: usize) -> Vec<Complex64> {
    let h = 1.0 / intervals as f64;
    (0..=intervals)
        .map(|i| model.opd(i as f64 * h, z_o_nm))
        .collect()
}

/// Composite Simpson weight of node `i` out of `last + 1`.
fn simpson_weight(i: usize, last: usize) -> f64 {
    if i == 0 || i == last {
        1.0
    } else if i % 2 == 1 {
        4.0
    } else {
        2.0
    }
}

/// OPD samples valid for exactly one axial offset.
#[derive(Debug, Clone)]
pub struct OpdCache {
    z_o_nm: f64,
    step: f64,
    values: Vec<Complex64>,
    weighted_phasors: Vec<Complex64>,
}

impl OpdCache {
    /// Build the cache for axial offset `z_o_nm`.
    pub fn precompute(model: &OpdModel, z_o_nm: f64, intervals: usize) -> Self {
        let mut cache = Self {
            z_o_nm,
            step: 1.0 / intervals as f64,
            values: precompute_opd_terms(model, z_o_nm, intervals),
            weighted_phasors: vec![Complex64::new(0.0, 0.0); intervals + 1],
        };
        cache.refresh_phasors(model.wavenumber());
        cache
    }

    /// Refresh in place for a new offset. Returns `false` (and does nothing)
    /// when `z_o_nm` is bitwise equal to the cached offset.
    pub fn rebuild(&mut self, model: &OpdModel, z_o_nm: f64) -> bool {
        if self.z_o_nm.to_bits() == z_o_nm.to_bits() {
            return false;
        }
        let h = self.step;
        for (i, value) in self.values.iter_mut().enumerate() {
            *value = model.opd(i as f64 * h, z_o_nm);
        }
        self.refresh_phasors(model.wavenumber());
        self.z_o_nm = z_o_nm;
        true
    }

    fn refresh_phasors(&mut self, k: f64) {
        let h = self.step;
        let last = self.values.len() - 1;
        for (i, (phasor, &w)) in self.weighted_phasors.iter_mut().zip(&self.values).enumerate() {
            let rho = i as f64 * h;
            *phasor = (simpson_weight(i, last) * rho * h / 3.0) * (Complex64::i() * k * w).exp();
        }
    }

    pub fn z_o_nm(&self) -> f64 {
        self.z_o_nm
    }

    /// Pupil radius spacing between nodes.
    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn intervals(&self) -> usize {
        self.values.len() - 1
    }

    pub fn rho(&self, index: usize) -> f64 {
        index as f64 * self.step
    }

    pub fn values(&self) -> &[Complex64] {
        &self.values
    }

    /// Per-node Simpson weight times `rho exp(i k W)`, including `h/3`.
    pub fn weighted_phasors(&self) -> &[Complex64] {
        &self.weighted_phasors
    }

    /// Largest change of the real phase `k·Re(W)` between adjacent nodes.
    pub fn max_phase_step(&self, k: f64) -> f64 {
        self.values
            .windows(2)
            .map(|w| (k * (w[1].re - w[0].re)).abs())
            .fold(0.0, f64::max)
    }
}
