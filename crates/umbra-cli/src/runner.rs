//! Job runner: ties together configuration, synthesis and calibration.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use umbra_compute::{ComputeBackend, CpuBackend};
use umbra_core::error::NumericWarning;
use umbra_core::optimizer::{OptimizationProblem, OptimizationResult, Optimizer};
use umbra_core::synthesis::{ForwardModel, SynthesisOutput, SynthesisSettings};
use umbra_core::types::{ImageGeometry, OpticalParameters, ParameterId, SyntheticImage};

use crate::config::{JobConfig, OptimizationConfig};

/// On-disk form of a volume: geometry plus values in `[z, y, x]` order.
#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeFile {
    pub geometry: ImageGeometry,
    pub values: Vec<f64>,
}

/// Results of a synthesis job.
pub struct SynthesisRun {
    pub output: SynthesisOutput,
    pub model_name: String,
    pub device: String,
}

/// Results of a calibration job.
pub struct OptimizationRun {
    pub result: OptimizationResult,
    pub best: SynthesisOutput,
    pub free: Vec<ParameterId>,
    pub model_name: String,
    pub device: String,
}

#[derive(Serialize)]
struct Summary<'a> {
    version: &'static str,
    model: &'a str,
    device: &'a str,
    size: [usize; 3],
    spacing_nm: [f64; 3],
    min: Option<f64>,
    max: Option<f64>,
    max_position_nm: Option<[f64; 3]>,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimization: Option<&'a OptimizationResult>,
}

/// Build synthesis settings, including a dedicated thread pool if requested.
pub fn build_settings(job: &JobConfig) -> Result<SynthesisSettings> {
    let backend: Arc<dyn ComputeBackend> = match job.synthesis.threads {
        Some(n) => Arc::new(CpuBackend::with_threads(n).context("creating worker pool")?),
        None => Arc::new(CpuBackend::new()),
    };
    println!("Backend: {}", backend.device_info().name);

    let settings = SynthesisSettings {
        pupil_intervals: job.synthesis.pupil_intervals,
        radial_interpolation: job.synthesis.radial_interpolation,
        point_center_nm: job.synthesis.point_center_nm,
        backend,
    };
    settings.validate()?;
    Ok(settings)
}

/// Synthesise the configured model once.
pub fn run_synthesis(job: &JobConfig) -> Result<SynthesisRun> {
    let geometry = job.geometry.to_geometry()?;
    let settings = build_settings(job)?;
    let model = job.model.to_model();

    println!(
        "Synthesising {} on {}x{}x{} voxels ({} pupil intervals)",
        model.model_name(),
        geometry.size[0],
        geometry.size[1],
        geometry.size[2],
        settings.pupil_intervals
    );
    let output = model
        .synthesize(&job.optics, &geometry, &settings)
        .context("synthesis failed")?;
    report_warnings(&output.warnings);

    Ok(SynthesisRun {
        output,
        model_name: model.model_name().to_string(),
        device: settings.backend.device_info().name,
    })
}

/// Read a measured volume written by `save_volume` (or any tool producing
/// the same JSON layout).
pub fn load_volume(path: &Path) -> Result<SyntheticImage> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading measured volume {}", path.display()))?;
    let file: VolumeFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing measured volume {}", path.display()))?;
    let image = SyntheticImage::from_vec(file.geometry, file.values)
        .with_context(|| format!("measured volume {}", path.display()))?;
    Ok(image)
}

/// Assemble the calibration problem for a job with an `[optimization]` table.
pub fn build_problem(job: &JobConfig, opt: &OptimizationConfig) -> Result<OptimizationProblem> {
    let measured = load_volume(&opt.measured)?;
    let mut problem = OptimizationProblem::new(measured, job.optics.clone(), opt.free.clone());
    problem.metric = opt.metric;
    problem.budget = opt.budget;
    problem.model = job.model.to_model();
    problem.settings = build_settings(job)?;
    problem.validate()?;
    Ok(problem)
}

/// Calibrate the free parameters against the measured volume.
pub fn run_optimization(job: &JobConfig) -> Result<OptimizationRun> {
    let opt = job
        .optimization
        .as_ref()
        .context("job file has no [optimization] table")?;
    let problem = build_problem(job, opt)?;
    let free: Vec<ParameterId> = problem.free.iter().map(|f| f.parameter).collect();

    println!(
        "Calibrating {} against {} ({})",
        free.iter().map(|p| p.name()).collect::<Vec<_>>().join(", "),
        opt.measured.display(),
        problem.metric
    );

    let mut optimizer = Optimizer::new(problem)?;
    let result = optimizer
        .run_with(|report| {
            if report.iteration == 1 || report.iteration % 10 == 0 {
                println!(
                    "  [{:>4}] score={:.6e} evaluations={} diameter={:.2e}",
                    report.iteration, report.best_score, report.evaluations, report.simplex_diameter
                );
            }
            ControlFlow::Continue(())
        })
        .context("calibration failed")?;

    println!(
        "Finished: {:?} after {} iterations ({} evaluations), score {:.6e}",
        result.status, result.iterations, result.evaluations, result.score
    );
    for id in &free {
        println!("  {id} = {} {}", result.parameters.get(*id), id.unit());
    }

    let problem = optimizer.problem();
    let best = problem
        .model
        .synthesize(&result.parameters, problem.measured.geometry(), &problem.settings)
        .context("re-synthesising the best candidate")?;
    report_warnings(&best.warnings);

    Ok(OptimizationRun {
        result,
        best,
        free,
        model_name: problem.model.model_name().to_string(),
        device: problem.settings.backend.device_info().name,
    })
}

fn report_warnings(warnings: &[NumericWarning]) {
    for warning in warnings {
        eprintln!("Warning: {warning}");
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    Ok(())
}

/// Write a JSON summary of an image and, optionally, the calibration result.
pub fn write_summary_json(
    output: &SynthesisOutput,
    model: &str,
    device: &str,
    optimization: Option<&OptimizationResult>,
    path: &Path,
) -> Result<()> {
    ensure_parent(path)?;
    let image = &output.image;
    let geometry = image.geometry();
    let summary = Summary {
        version: env!("CARGO_PKG_VERSION"),
        model,
        device,
        size: geometry.size,
        spacing_nm: geometry.spacing_nm,
        min: image.min(),
        max: image.max(),
        max_position_nm: image.max_position_nm(),
        warnings: output.warnings.iter().map(|w| w.to_string()).collect(),
        optimization,
    };
    let json = serde_json::to_string_pretty(&summary).context("serialising summary")?;
    std::fs::write(path, json)?;
    println!("Summary written to: {}", path.display());
    Ok(())
}

/// Write the parameter record as JSON, loadable as an `[optics]` table source.
pub fn write_parameters_json(params: &OpticalParameters, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(params).context("serialising parameters")?;
    std::fs::write(path, json)?;
    println!("Parameters written to: {}", path.display());
    Ok(())
}

/// Write the whole volume in the layout [`load_volume`] reads.
pub fn write_volume_json(image: &SyntheticImage, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let file = VolumeFile {
        geometry: image.geometry().clone(),
        values: image.data().iter().copied().collect(),
    };
    let json = serde_json::to_string(&file).context("serialising volume")?;
    std::fs::write(path, json)?;
    println!("Volume written to: {}", path.display());
    Ok(())
}

/// Write the axial profile and the lateral (x) profile through the brightest
/// voxel to a CSV file with a metadata header.
pub fn write_profiles_csv(image: &SyntheticImage, model: &str, path: &Path) -> Result<()> {
    use std::io::Write;

    let [ix0, iy0, iz0] = image
        .argmax()
        .context("volume has no finite voxels; no profiles written")?;
    ensure_parent(path)?;
    let geometry = image.geometry();
    let [x0, y0, z0] = geometry.voxel_position(ix0, iy0, iz0);

    let mut file = std::fs::File::create(path)?;
    writeln!(file, "# Umbra - intensity profiles through the maximum")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# Model: {model}")?;
    writeln!(file, "# Maximum at x={x0:.2} y={y0:.2} z={z0:.2} nm")?;
    writeln!(file, "#")?;
    writeln!(file, "profile,position_nm,intensity")?;

    for iz in 0..geometry.size[2] {
        writeln!(
            file,
            "axial,{:.4},{:.6e}",
            geometry.z_position(iz),
            image.value_at(ix0, iy0, iz)
        )?;
    }
    for ix in 0..geometry.size[0] {
        writeln!(
            file,
            "lateral,{:.4},{:.6e}",
            geometry.x_position(ix) - x0,
            image.value_at(ix, iy0, iz0)
        )?;
    }

    println!("Profiles written to: {}", path.display());
    Ok(())
}
