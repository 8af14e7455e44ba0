//! TOML configuration deserialisation for synthesis and calibration jobs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use umbra_core::objective::ComparisonMetric;
use umbra_core::optimizer::{FreeParameter, OptimizationBudget};
use umbra_core::synthesis::{BeadModel, PsfModel, DEFAULT_PUPIL_INTERVALS};
use umbra_core::types::{ImageGeometry, OpticalParameters};

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    /// Any `OpticalParameters` field; omitted fields keep their defaults.
    #[serde(default)]
    pub optics: OpticalParameters,
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub optimization: Option<OptimizationConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output volume sampling.
#[derive(Debug, Deserialize)]
pub struct GeometryConfig {
    pub size: [usize; 3],
    pub spacing_nm: [f64; 3],
    /// Position of voxel (0, 0, 0). Omit for a grid centred on the origin.
    #[serde(default)]
    pub origin_nm: Option<[f64; 3]>,
    /// Explicit slice positions, one per z slice.
    #[serde(default)]
    pub custom_z_positions_nm: Option<Vec<f64>>,
    /// Generate custom slice positions centred about z = 0, top slice first.
    #[serde(default)]
    pub centered_z: bool,
}

impl GeometryConfig {
    pub fn to_geometry(&self) -> anyhow::Result<ImageGeometry> {
        let mut geometry = match self.origin_nm {
            Some(origin_nm) => ImageGeometry {
                size: self.size,
                spacing_nm: self.spacing_nm,
                origin_nm,
                custom_z_positions_nm: None,
            },
            None => ImageGeometry::centered(self.size, self.spacing_nm),
        };

        let positions = match (&self.custom_z_positions_nm, self.centered_z) {
            (Some(_), true) => {
                anyhow::bail!("geometry: set either custom_z_positions_nm or centered_z, not both")
            }
            (Some(list), false) => Some(list.clone()),
            (None, true) => Some(ImageGeometry::centered_z_positions(self.size[2], self.spacing_nm[2])),
            (None, false) => None,
        };
        if let Some(positions) = positions {
            geometry = geometry.with_custom_z_positions(positions)?;
        }
        geometry.validate()?;
        Ok(geometry)
    }
}

/// Quadrature and scheduling options.
#[derive(Debug, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_pupil_intervals")]
    pub pupil_intervals: usize,
    #[serde(default)]
    pub radial_interpolation: bool,
    /// Worker threads; omit to use every available core.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub point_center_nm: [f64; 3],
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            pupil_intervals: default_pupil_intervals(),
            radial_interpolation: false,
            threads: None,
            point_center_nm: [0.0; 3],
        }
    }
}

fn default_pupil_intervals() -> usize {
    DEFAULT_PUPIL_INTERVALS
}

/// Which forward model to render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Psf,
    Bsf,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub kind: ModelKind,
    /// Bead parameters, used when `kind = "bsf"`.
    #[serde(default)]
    pub bead: BeadModel,
}

impl ModelConfig {
    pub fn to_model(&self) -> PsfModel {
        match self.kind {
            ModelKind::Psf => PsfModel::GibsonLanni,
            ModelKind::Bsf => PsfModel::BeadSpread(self.bead.clone()),
        }
    }
}

/// Calibration against a measured volume.
#[derive(Debug, Deserialize)]
pub struct OptimizationConfig {
    /// JSON file holding `{ "geometry": {...}, "values": [...] }`.
    pub measured: PathBuf,
    #[serde(default)]
    pub metric: ComparisonMetric,
    pub free: Vec<FreeParameter>,
    #[serde(default)]
    pub budget: OptimizationBudget,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Write `summary.json` (default: true).
    #[serde(default = "default_true")]
    pub save_summary: bool,
    /// Write axial and lateral profiles through the maximum as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_profiles: bool,
    /// Write the whole volume as JSON, readable as a measured volume (default: false).
    #[serde(default)]
    pub save_volume: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_summary: true,
            save_profiles: true,
            save_volume: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

/// Load and parse a TOML job configuration file. Relative `measured` paths
/// are resolved against the job file's directory.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading job file {}", path.display()))?;
    let mut config: JobConfig =
        toml::from_str(&content).with_context(|| format!("parsing job file {}", path.display()))?;

    if let (Some(opt), Some(dir)) = (config.optimization.as_mut(), path.parent()) {
        if opt.measured.is_relative() {
            opt.measured = dir.join(&opt.measured);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::types::ParameterId;

    const JOB: &str = r#"
        [optics]
        numerical_aperture = 1.3
        actual_point_source_depth_nm = 2500.0

        [geometry]
        size = [32, 32, 16]
        spacing_nm = [65.0, 65.0, 200.0]
        centered_z = true

        [synthesis]
        radial_interpolation = true
        threads = 2

        [model]
        kind = "bsf"
        bead = { radius_nm = 100.0, samples_per_axis = 4 }

        [optimization]
        measured = "bead.json"
        metric = "peak_normalized_mean_squared_error"

        [[optimization.free]]
        parameter = "actual_specimen_layer_refractive_index"
        lower = 1.30
        upper = 1.52

        [optimization.budget]
        max_iterations = 50
    "#;

    #[test]
    fn test_full_job_parses() {
        let job: JobConfig = toml::from_str(JOB).unwrap();
        assert_eq!(job.optics.numerical_aperture, 1.3);
        assert_eq!(job.optics.magnification, OpticalParameters::default().magnification);
        assert_eq!(job.synthesis.pupil_intervals, DEFAULT_PUPIL_INTERVALS);
        assert_eq!(job.synthesis.threads, Some(2));

        let geometry = job.geometry.to_geometry().unwrap();
        assert_eq!(geometry.z_position(0), 1500.0);
        assert_eq!(geometry.z_position(15), -1500.0);

        assert!(matches!(job.model.to_model(), PsfModel::BeadSpread(b) if b.samples_per_axis == 4));

        let opt = job.optimization.unwrap();
        assert_eq!(opt.metric, ComparisonMetric::PeakNormalizedMeanSquaredError);
        assert_eq!(opt.free[0].parameter, ParameterId::ActualSpecimenLayerRefractiveIndex);
        assert_eq!(opt.budget.max_iterations, 50);
        assert_eq!(opt.budget.x_tolerance, OptimizationBudget::default().x_tolerance);
        assert!(job.output.save_summary);
    }

    #[test]
    fn test_minimal_job_uses_defaults() {
        let job: JobConfig = toml::from_str(
            r#"
            [geometry]
            size = [8, 8, 8]
            spacing_nm = [100.0, 100.0, 100.0]
            "#,
        )
        .unwrap();
        assert_eq!(job.optics, OpticalParameters::default());
        assert_eq!(job.model.kind, ModelKind::Psf);
        assert!(job.optimization.is_none());
        assert_eq!(job.output.directory, "./output");
        let geometry = job.geometry.to_geometry().unwrap();
        assert_eq!(geometry.x_position(0), -350.0);
    }

    #[test]
    fn test_shipped_jobs_parse() {
        let synthesis: JobConfig = toml::from_str(include_str!("../jobs/psf_synthesis.toml")).unwrap();
        synthesis.optics.validate().unwrap();
        synthesis.geometry.to_geometry().unwrap();
        assert!(synthesis.output.save_volume);

        let calibration: JobConfig = toml::from_str(include_str!("../jobs/calibration.toml")).unwrap();
        calibration.optics.validate().unwrap();
        let opt = calibration.optimization.unwrap();
        let free: Vec<ParameterId> = opt.free.iter().map(|f| f.parameter).collect();
        assert_eq!(
            free,
            vec![ParameterId::NumericalAperture, ParameterId::ActualSpecimenLayerRefractiveIndex]
        );
        assert_eq!(opt.metric, ComparisonMetric::NormalizedCrossCorrelation);
    }

    #[test]
    fn test_conflicting_z_options_rejected() {
        let geometry = GeometryConfig {
            size: [4, 4, 2],
            spacing_nm: [100.0; 3],
            origin_nm: None,
            custom_z_positions_nm: Some(vec![0.0, 10.0]),
            centered_z: true,
        };
        assert!(geometry.to_geometry().is_err());
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let result: Result<FreeParameter, _> =
            toml::from_str("parameter = \"focal_length\"\nlower = 0.0\nupper = 1.0\n");
        assert!(result.is_err());
    }
}
