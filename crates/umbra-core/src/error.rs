//! Error and warning types shared across the synthesis pipeline.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// An invalid parameter, geometry or setting, detected before any numerical
/// work begins. Values are never clamped into range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{parameter} must be positive, got {value}")]
    NonPositive { parameter: &'static str, value: f64 },

    #[error("{parameter} must not be negative, got {value}")]
    Negative { parameter: &'static str, value: f64 },

    #[error("{parameter} must be finite, got {value}")]
    NonFinite { parameter: &'static str, value: f64 },

    #[error("Magnification ({magnification}) must exceed the numerical aperture ({numerical_aperture})")]
    MagnificationBelowAperture { magnification: f64, numerical_aperture: f64 },

    #[error("Numerical aperture {numerical_aperture} exceeds the {layer} refractive index {index}")]
    ApertureExceedsIndex { numerical_aperture: f64, layer: &'static str, index: f64 },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Image geometries do not match: {0}")]
    GeometryMismatch(String),

    #[error("Images have no finite voxels in common")]
    EmptyOverlap,

    #[error("Invalid synthesis settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid optimisation problem: {0}")]
    InvalidProblem(String),
}

/// Reduced-accuracy conditions hit during synthesis. Synthesis still
/// returns a best-effort image when these occur.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NumericWarning {
    /// Bessel evaluations whose argument was too large for the phase
    /// reduction to keep full precision.
    DegradedBessel { z_nm: f64, evaluations: usize },
    /// The integrand phase advanced by more than π between adjacent pupil
    /// nodes, so the quadrature under-resolves it.
    UndersampledPupil { z_nm: f64, max_phase_step: f64 },
}

impl fmt::Display for NumericWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericWarning::DegradedBessel { z_nm, evaluations } => write!(
                f,
                "{evaluations} Bessel evaluations at z={z_nm:.1} nm used a degraded-accuracy branch"
            ),
            NumericWarning::UndersampledPupil { z_nm, max_phase_step } => write!(
                f,
                "pupil integrand at z={z_nm:.1} nm advances {max_phase_step:.2} rad per node; increase pupil_intervals"
            ),
        }
    }
}
