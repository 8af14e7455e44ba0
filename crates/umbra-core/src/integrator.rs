//! Pupil quadrature for a single voxel.
//!
//! The scalar field at radial distance $r_o$ (object space) and axial offset
//! $z_o$ is
//!
//! $$
//! U(r_o, z_o) = \int_0^1 J_0\!\left(\frac{k\,a\,\rho\,M r_o}{z_d}\right)
//!   e^{i k W(\rho, z_o)}\,\rho\,d\rho
//! $$
//!
//! where $M r_o$ is the radial distance projected onto the detector. The
//! voxel intensity is $|U|^2$. The model is rotationally symmetric: only the
//! radial distance from the optical axis enters, never the azimuth.
//!
//! The integral is evaluated with composite Simpson's rule on the nodes of
//! the [`OpdCache`], so the number of intervals must be even.

use num_complex::Complex64;

use crate::cache::OpdCache;
use crate::opd::{aperture_radius_nm, OpdModel};
use crate::special::{argument_accuracy, bessel_j0, Accuracy};
use crate::types::{OpticalParameters, NM_PER_MM};

/// Per-synthesis constants of the diffraction integral, in nanometres.
#[derive(Debug, Clone, Copy)]
pub struct IntegrationConstants {
    /// Vacuum wavenumber $2\pi/\lambda$ (nm⁻¹).
    pub wavenumber: f64,
    /// Back-aperture radius $a$ (nm).
    pub aperture_radius_nm: f64,
    /// Actual back-focal-plane to detector distance $z_d$ (nm).
    pub detector_distance_nm: f64,
    /// Lateral magnification $M$.
    pub magnification: f64,
}

impl IntegrationConstants {
    pub fn from_params(params: &OpticalParameters) -> Self {
        Self {
            wavenumber: 2.0 * std::f64::consts::PI / params.emission_wavelength_nm,
            aperture_radius_nm: aperture_radius_nm(params),
            detector_distance_nm: params.actual_detector_distance_mm * NM_PER_MM,
            magnification: params.magnification,
        }
    }

    /// Factor that turns `rho · r_o` into the Bessel argument.
    pub fn bessel_scale(&self) -> f64 {
        self.wavenumber * self.aperture_radius_nm * self.magnification / self.detector_distance_nm
    }
}

/// Complex amplitude $U(r_o, z_o)$ for the offset the cache was built for.
///
/// The phase and Simpson weights come precomputed from the cache; only the
/// Bessel factor depends on the voxel.
pub fn integral_term(cache: &OpdCache, constants: &IntegrationConstants, r_o_nm: f64) -> Complex64 {
    let phasors = cache.weighted_phasors();
    let scale = constants.bessel_scale() * r_o_nm;
    if scale == 0.0 {
        return phasors.iter().sum();
    }
    let h = cache.step();
    phasors
        .iter()
        .enumerate()
        .map(|(i, &p)| bessel_j0(scale * i as f64 * h) * p)
        .sum()
}

/// Number of quadrature nodes whose Bessel argument falls on the
/// reduced-accuracy branch for radial distance `r_o_nm`.
pub fn degraded_evaluations(cache: &OpdCache, constants: &IntegrationConstants, r_o_nm: f64) -> usize {
    let scale = constants.bessel_scale() * r_o_nm;
    if argument_accuracy(scale) == Accuracy::Full {
        return 0;
    }
    (0..=cache.intervals())
        .filter(|&i| argument_accuracy(scale * cache.rho(i)) == Accuracy::Degraded)
        .count()
}

/// Intensity at Cartesian `point_nm` for a source at `source_nm`.
///
/// The cache is rebuilt first if it holds a different axial offset, so
/// traversing voxels slice by slice rebuilds it once per slice.
pub fn compute_pixel_value(
    cache: &mut OpdCache,
    model: &OpdModel,
    constants: &IntegrationConstants,
    point_nm: [f64; 3],
    source_nm: [f64; 3],
) -> f64 {
    let dx = point_nm[0] - source_nm[0];
    let dy = point_nm[1] - source_nm[1];
    let r_o = dx.hypot(dy);
    let z_o = point_nm[2] - source_nm[2];
    cache.rebuild(model, z_o);
    integral_term(cache, constants, r_o).norm_sqr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::special::PHASE_PRECISION_LIMIT;

    fn setup(params: &OpticalParameters) -> (OpdModel, IntegrationConstants) {
        (OpdModel::new(params), IntegrationConstants::from_params(params))
    }

    #[test]
    fn test_in_focus_on_axis_is_quarter() {
        // W = 0 and J0(0) = 1 leave ∫ rho drho = 1/2, so |U|² = 1/4.
        let params = OpticalParameters::default();
        let (model, constants) = setup(&params);
        let cache = OpdCache::precompute(&model, 0.0, 64);
        let u = integral_term(&cache, &constants, 0.0);
        assert_relative_eq!(u.re, 0.5, max_relative = 1e-12);
        assert!(u.im.abs() < 1e-12);
    }

    #[test]
    fn test_bessel_scale_is_close_to_k_na() {
        // a M / z_d ≈ NA when the detector sits at the tube length
        let params = OpticalParameters::default();
        let constants = IntegrationConstants::from_params(&params);
        let k_na = constants.wavenumber * params.numerical_aperture;
        assert_relative_eq!(constants.bessel_scale(), k_na, max_relative = 1e-3);
    }

    #[test]
    fn test_airy_first_dark_ring() {
        // In focus the integral reduces to the Airy amplitude 2 J1(v)/v · 1/2,
        // which vanishes at v ≈ 3.8317.
        let params = OpticalParameters::default();
        let (model, constants) = setup(&params);
        let cache = OpdCache::precompute(&model, 0.0, 256);
        let r_zero = 3.831_705_970_207_512 / constants.bessel_scale();
        let peak = integral_term(&cache, &constants, 0.0).norm_sqr();
        let dark = integral_term(&cache, &constants, r_zero).norm_sqr();
        assert!(dark / peak < 1e-8, "ratio {}", dark / peak);
    }

    #[test]
    fn test_defocus_symmetric_without_aberration() {
        let params = OpticalParameters::default();
        let (model, constants) = setup(&params);
        let mut cache = OpdCache::precompute(&model, 0.0, 128);
        let above = compute_pixel_value(&mut cache, &model, &constants, [80.0, 0.0, 300.0], [0.0; 3]);
        let below = compute_pixel_value(&mut cache, &model, &constants, [80.0, 0.0, -300.0], [0.0; 3]);
        assert_relative_eq!(above, below, max_relative = 1e-10);
    }

    #[test]
    fn test_reused_and_fresh_cache_agree() {
        let params = OpticalParameters {
            actual_specimen_layer_refractive_index: 1.42,
            actual_point_source_depth_nm: 2000.0,
            ..Default::default()
        };
        let (model, constants) = setup(&params);
        let point = [120.0, -60.0, 150.0];

        let mut reused = OpdCache::precompute(&model, -900.0, 128);
        compute_pixel_value(&mut reused, &model, &constants, [0.0, 0.0, -900.0], [0.0; 3]);
        let via_reused = compute_pixel_value(&mut reused, &model, &constants, point, [0.0; 3]);

        let mut fresh = OpdCache::precompute(&model, 150.0, 128);
        let via_fresh = compute_pixel_value(&mut fresh, &model, &constants, point, [0.0; 3]);

        assert_eq!(via_reused, via_fresh);
    }

    #[test]
    fn test_degraded_nodes_counted_only_far_off_axis() {
        let params = OpticalParameters::default();
        let (model, constants) = setup(&params);
        let cache = OpdCache::precompute(&model, 0.0, 64);
        assert_eq!(degraded_evaluations(&cache, &constants, 5_000.0), 0);

        // nodes from rho = 0.5 upwards cross the limit
        let r_far = 2.0 * PHASE_PRECISION_LIMIT / constants.bessel_scale() * 1.000_001;
        let count = degraded_evaluations(&cache, &constants, r_far);
        assert_eq!(count, 33);
    }

    #[test]
    fn test_only_radius_matters() {
        let params = OpticalParameters::default();
        let (model, constants) = setup(&params);
        let mut cache = OpdCache::precompute(&model, 100.0, 64);
        let a = compute_pixel_value(&mut cache, &model, &constants, [30.0, 40.0, 100.0], [0.0; 3]);
        let b = compute_pixel_value(&mut cache, &model, &constants, [-50.0, 0.0, 100.0], [0.0; 3]);
        let c = compute_pixel_value(&mut cache, &model, &constants, [0.0, -50.0, 100.0], [0.0; 3]);
        assert_relative_eq!(a, b, max_relative = 1e-12);
        assert_relative_eq!(b, c, max_relative = 1e-12);
    }
}
