//! Volume synthesis.
//!
//! The [`ForwardModel`] trait defines the interface every image model
//! implements. [`PsfModel`] is the closed set of models shipped with Umbra:
//! the Gibson-Lanni point-spread function and its bead-spread variant.
//! Both run the same slice-parallel traversal in [`volume`].

pub mod bead;
mod volume;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use umbra_compute::{ComputeBackend, ComputeError, CpuBackend};

use crate::error::{ConfigurationError, NumericWarning};
use crate::types::{ImageGeometry, OpticalParameters, SyntheticImage};

pub use bead::BeadModel;

/// Default number of Simpson intervals over the pupil radius.
pub const DEFAULT_PUPIL_INTERVALS: usize = 128;

/// Errors that abort a synthesis call.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Synthesis aborted: {0}")]
    WorkerFailure(#[from] ComputeError),
}

/// Numerical and scheduling knobs of a synthesis call.
#[derive(Clone)]
pub struct SynthesisSettings {
    /// Simpson intervals over `rho ∈ [0, 1]`; must be even and at least 2.
    pub pupil_intervals: usize,
    /// Evaluate one radial profile per slice and interpolate it linearly
    /// instead of integrating at every voxel.
    pub radial_interpolation: bool,
    /// Lateral and axial position of the point source (nm).
    pub point_center_nm: [f64; 3],
    /// Where the slices are scheduled.
    pub backend: Arc<dyn ComputeBackend>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            pupil_intervals: DEFAULT_PUPIL_INTERVALS,
            radial_interpolation: false,
            point_center_nm: [0.0; 3],
            backend: Arc::new(CpuBackend::new()),
        }
    }
}

impl fmt::Debug for SynthesisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisSettings")
            .field("pupil_intervals", &self.pupil_intervals)
            .field("radial_interpolation", &self.radial_interpolation)
            .field("point_center_nm", &self.point_center_nm)
            .field("backend", &self.backend.device_info().name)
            .finish()
    }
}

impl SynthesisSettings {
    pub fn with_backend(mut self, backend: Arc<dyn ComputeBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.pupil_intervals < 2 || self.pupil_intervals % 2 != 0 {
            return Err(ConfigurationError::InvalidSettings(format!(
                "pupil_intervals must be even and at least 2, got {}",
                self.pupil_intervals
            )));
        }
        if self.point_center_nm.iter().any(|c| !c.is_finite()) {
            return Err(ConfigurationError::InvalidSettings(format!(
                "point_center_nm must be finite, got {:?}",
                self.point_center_nm
            )));
        }
        Ok(())
    }
}

/// A synthesised volume and the numeric warnings raised while producing it,
/// ordered by slice.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub image: SyntheticImage,
    pub warnings: Vec<NumericWarning>,
}

/// Interface implemented by every image model.
///
/// The optimiser and the CLI only see this trait, so models can be swapped
/// without touching the calibration loop.
pub trait ForwardModel {
    /// Render the model for one parameter record on `geometry`.
    fn synthesize(
        &self,
        params: &OpticalParameters,
        geometry: &ImageGeometry,
        settings: &SynthesisSettings,
    ) -> Result<SynthesisOutput, SynthesisError>;

    /// Human-readable name of the model.
    fn model_name(&self) -> &str;
}

/// The image models available for synthesis and calibration.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PsfModel {
    /// Point-spread function of a single point source.
    #[default]
    GibsonLanni,
    /// Point-spread function averaged over a fluorescent bead.
    BeadSpread(BeadModel),
}

impl ForwardModel for PsfModel {
    fn synthesize(
        &self,
        params: &OpticalParameters,
        geometry: &ImageGeometry,
        settings: &SynthesisSettings,
    ) -> Result<SynthesisOutput, SynthesisError> {
        match self {
            PsfModel::GibsonLanni => volume::synthesize_volume(
                params,
                geometry,
                settings,
                &[volume::SourceSample::point()],
            ),
            PsfModel::BeadSpread(bead) => {
                bead.validate()?;
                volume::synthesize_volume(params, geometry, settings, &bead.source_samples())
            }
        }
    }

    fn model_name(&self) -> &str {
        match self {
            PsfModel::GibsonLanni => "Gibson-Lanni PSF",
            PsfModel::BeadSpread(_) => "Gibson-Lanni BSF",
        }
    }
}

/// Synthesise the Gibson-Lanni PSF of `params` on `geometry`.
///
/// Everything is validated before any voxel is computed. The output is
/// bit-identical for any backend thread count.
pub fn synthesize(
    params: &OpticalParameters,
    geometry: &ImageGeometry,
    settings: &SynthesisSettings,
) -> Result<SynthesisOutput, SynthesisError> {
    PsfModel::GibsonLanni.synthesize(params, geometry, settings)
}
