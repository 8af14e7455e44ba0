//! Gibson-Lanni optical path difference (OPD) model.
//!
//! Each refractive layer of thickness $t$ and index $n$ contributes
//! $t\sqrt{n^2 - (\mathrm{NA}\,\rho)^2}$ to the optical path of the ray
//! leaving normalised pupil radius $\rho$. The aberration is the sum of the
//! actual-minus-design contributions of the cover slip, the immersion oil and
//! the specimen layer, plus a defocus term:
//!
//! $$
//! W(\rho, \Delta z) = \sum_{\text{layers}} \bigl[t\sqrt{n^2 - \mathrm{NA}^2\rho^2}
//!   - t^*\sqrt{n^{*2} - \mathrm{NA}^2\rho^2}\bigr]
//!   + \Delta z\sqrt{n_{\text{oil}}^2 - \mathrm{NA}^2\rho^2}
//!   + \frac{n_{\text{oil}}(z_d^* - z_d)\,a^2\rho^2}{2 z_d^* z_d}
//! $$
//!
//! The specimen layer is evaluated over the point source depth with both the
//! actual and the design index, so a source in a specimen that matches its
//! design index is in focus at $\Delta z = 0$.
//!
//! # Reference
//! S. F. Gibson and F. Lanni, *J. Opt. Soc. Am. A* **8**, 1601 (1991).

use num_complex::Complex64;

use crate::types::{OpticalParameters, NM_PER_MM, NM_PER_UM};

/// Optical path through one layer at pupil radius `rho` (nm).
///
/// The square root is taken in the complex plane: when `NA·rho > n` the ray
/// is evanescent in this layer and the term becomes imaginary, which turns
/// `exp(i k W)` into a decaying amplitude.
pub fn layer_term(na: f64, n: f64, rho: f64, t_nm: f64) -> Complex64 {
    let na_rho = na * rho;
    let radicand = Complex64::new(n * n - na_rho * na_rho, 0.0);
    t_nm * radicand.sqrt()
}

/// Back-aperture radius (nm) projected from the mechanical tube length:
/// $a = L\,\mathrm{NA} / \sqrt{M^2 - \mathrm{NA}^2}$.
pub fn aperture_radius_nm(params: &OpticalParameters) -> f64 {
    let na = params.numerical_aperture;
    let m = params.magnification;
    params.mechanical_tube_length_mm * NM_PER_MM * na / (m * m - na * na).sqrt()
}

/// A layer described by its design and actual index/thickness pairs.
#[derive(Debug, Clone, Copy)]
struct Layer {
    design_index: f64,
    design_thickness_nm: f64,
    actual_index: f64,
    actual_thickness_nm: f64,
}

impl Layer {
    fn mismatch(&self, na: f64, rho: f64) -> Complex64 {
        layer_term(na, self.actual_index, rho, self.actual_thickness_nm)
            - layer_term(na, self.design_index, rho, self.design_thickness_nm)
    }
}

/// OPD evaluator with every length pre-converted to nanometres.
#[derive(Debug, Clone)]
pub struct OpdModel {
    numerical_aperture: f64,
    wavenumber: f64,
    cover_slip: Layer,
    immersion_oil: Layer,
    specimen: Layer,
    aperture_radius_nm: f64,
    design_detector_distance_nm: f64,
    actual_detector_distance_nm: f64,
}

impl OpdModel {
    pub fn new(params: &OpticalParameters) -> Self {
        let depth_nm = params.actual_point_source_depth_nm;
        Self {
            numerical_aperture: params.numerical_aperture,
            wavenumber: 2.0 * std::f64::consts::PI / params.emission_wavelength_nm,
            cover_slip: Layer {
                design_index: params.design_cover_slip_refractive_index,
                design_thickness_nm: params.design_cover_slip_thickness_um * NM_PER_UM,
                actual_index: params.actual_cover_slip_refractive_index,
                actual_thickness_nm: params.actual_cover_slip_thickness_um * NM_PER_UM,
            },
            immersion_oil: Layer {
                design_index: params.design_immersion_oil_refractive_index,
                design_thickness_nm: params.design_immersion_oil_thickness_um * NM_PER_UM,
                actual_index: params.actual_immersion_oil_refractive_index,
                actual_thickness_nm: params.actual_immersion_oil_thickness_um * NM_PER_UM,
            },
            specimen: Layer {
                design_index: params.design_specimen_layer_refractive_index,
                design_thickness_nm: depth_nm,
                actual_index: params.actual_specimen_layer_refractive_index,
                actual_thickness_nm: depth_nm,
            },
            aperture_radius_nm: aperture_radius_nm(params),
            design_detector_distance_nm: params.design_detector_distance_mm * NM_PER_MM,
            actual_detector_distance_nm: params.actual_detector_distance_mm * NM_PER_MM,
        }
    }

    pub fn aperture_radius_nm(&self) -> f64 {
        self.aperture_radius_nm
    }

    /// Vacuum wavenumber $2\pi/\lambda$ (nm⁻¹).
    pub fn wavenumber(&self) -> f64 {
        self.wavenumber
    }

    /// Nominal defocus at pupil radius `rho` for an axial stage offset
    /// `delta_z_nm`, with back-aperture radius `a_nm`: the extra immersion oil
    /// path plus the paraxial detector-distance mismatch.
    pub fn defocus_term(&self, rho: f64, delta_z_nm: f64, a_nm: f64) -> Complex64 {
        let n_oil = self.immersion_oil.actual_index;
        let zd_design = self.design_detector_distance_nm;
        let zd_actual = self.actual_detector_distance_nm;
        let detector =
            n_oil * (zd_design - zd_actual) * a_nm * a_nm * rho * rho / (2.0 * zd_design * zd_actual);
        layer_term(self.numerical_aperture, n_oil, rho, delta_z_nm) + detector
    }

    /// Total OPD (nm) at pupil radius `rho` for axial offset `delta_z_nm`.
    pub fn opd(&self, rho: f64, delta_z_nm: f64) -> Complex64 {
        let na = self.numerical_aperture;
        self.cover_slip.mismatch(na, rho)
            + self.immersion_oil.mismatch(na, rho)
            + self.specimen.mismatch(na, rho)
            + self.defocus_term(rho, delta_z_nm, self.aperture_radius_nm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::types::ParameterId;

    #[test]
    fn test_layer_term_on_axis_is_optical_thickness() {
        let w = layer_term(1.4, 1.5, 0.0, 1000.0);
        assert_relative_eq!(w.re, 1500.0, max_relative = 1e-12);
        assert_eq!(w.im, 0.0);
    }

    #[test]
    fn test_layer_term_evanescent_is_imaginary() {
        // NA·rho = 1.4 > n = 1.33
        let w = layer_term(1.4, 1.33, 1.0, 500.0);
        assert!(w.re.abs() < 1e-9);
        assert!(w.im > 0.0, "evanescent term must decay, got {w}");
    }

    #[test]
    fn test_matched_conditions_have_zero_aberration() {
        let params = OpticalParameters {
            actual_point_source_depth_nm: 5000.0,
            ..Default::default()
        };
        let model = OpdModel::new(&params);
        for i in 0..=10 {
            let rho = i as f64 / 10.0;
            assert!(model.opd(rho, 0.0).norm() < 1e-9, "rho={rho}");
        }
    }

    #[test]
    fn test_defocus_term_is_oil_path() {
        let params = OpticalParameters::default();
        let model = OpdModel::new(&params);
        let w = model.defocus_term(0.5, 200.0, model.aperture_radius_nm());
        let expected = 200.0 * (1.515f64.powi(2) - 0.49).sqrt();
        assert_relative_eq!(w.re, expected, max_relative = 1e-12);
    }

    #[test]
    fn test_detector_mismatch_is_quadratic_in_rho() {
        let params = OpticalParameters::default().with(ParameterId::ActualDetectorDistanceMm, 170.0);
        let model = OpdModel::new(&params);
        let a = model.aperture_radius_nm();
        let at_half = model.defocus_term(0.5, 0.0, a).re;
        let at_full = model.defocus_term(1.0, 0.0, a).re;
        assert_relative_eq!(at_full, 4.0 * at_half, max_relative = 1e-9);
        assert!(at_full < 0.0, "longer detector distance shortens the path");
    }

    #[test]
    fn test_index_mismatch_grows_with_depth() {
        let base = OpticalParameters {
            actual_specimen_layer_refractive_index: 1.33,
            ..Default::default()
        };
        let shallow = OpdModel::new(&base.with(ParameterId::ActualPointSourceDepthNm, 1000.0));
        let deep = OpdModel::new(&base.with(ParameterId::ActualPointSourceDepthNm, 4000.0));
        let rho = 0.8;
        assert_relative_eq!(
            deep.opd(rho, 0.0).re,
            4.0 * shallow.opd(rho, 0.0).re,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_aperture_radius() {
        let params = OpticalParameters::default();
        let expected = 160.0e6 * 1.4 / (63.0f64 * 63.0 - 1.96).sqrt();
        assert_relative_eq!(aperture_radius_nm(&params), expected, max_relative = 1e-12);
    }
}
