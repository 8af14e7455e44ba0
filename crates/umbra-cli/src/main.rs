//! Umbra command-line interface.
//!
//! Synthesise and calibrate Gibson-Lanni PSFs from TOML job files:
//! ```sh
//! umbra-cli synthesize job.toml
//! umbra-cli optimize job.toml
//! umbra-cli validate job.toml
//! umbra-cli parameters
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use umbra_core::types::{OpticalParameters, ParameterId};

#[derive(Parser)]
#[command(name = "umbra-cli")]
#[command(about = "Umbra: Gibson-Lanni PSF synthesis and calibration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesise the configured PSF or BSF volume.
    Synthesize {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Calibrate the free parameters against the measured volume.
    Optimize {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without synthesising anything.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the optical parameters, their units and default values.
    Parameters,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Synthesize { config, output } => {
            println!("Umbra PSF Synthesis");
            println!("===================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let run = runner::run_synthesis(&job)?;
            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_summary {
                runner::write_summary_json(
                    &run.output,
                    &run.model_name,
                    &run.device,
                    None,
                    &out_dir.join("summary.json"),
                )?;
            }
            if job.output.save_profiles {
                runner::write_profiles_csv(&run.output.image, &run.model_name, &out_dir.join("profiles.csv"))?;
            }
            if job.output.save_volume {
                runner::write_volume_json(&run.output.image, &out_dir.join("volume.json"))?;
            }
            runner::write_parameters_json(&job.optics, &out_dir.join("parameters.json"))?;

            println!("Synthesis complete.");
            Ok(())
        }
        Commands::Optimize { config, output } => {
            println!("Umbra PSF Calibration");
            println!("=====================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let run = runner::run_optimization(&job)?;
            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_summary {
                runner::write_summary_json(
                    &run.best,
                    &run.model_name,
                    &run.device,
                    Some(&run.result),
                    &out_dir.join("summary.json"),
                )?;
            }
            if job.output.save_profiles {
                runner::write_profiles_csv(&run.best.image, &run.model_name, &out_dir.join("profiles.csv"))?;
            }
            if job.output.save_volume {
                runner::write_volume_json(&run.best.image, &out_dir.join("volume.json"))?;
            }
            runner::write_parameters_json(&run.result.parameters, &out_dir.join("parameters.json"))?;

            if !run.result.converged() {
                eprintln!(
                    "Warning: calibration did not converge ({:?}); parameters are the best found for: {}",
                    run.result.status,
                    run.free.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
                );
            }
            println!("Calibration complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            job.optics.validate()?;
            job.geometry.to_geometry()?;
            job.model.to_model();
            if let Some(opt) = &job.optimization {
                runner::build_problem(&job, opt)?;
            } else {
                runner::build_settings(&job)?;
            }
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Parameters => {
            let defaults = OpticalParameters::default();
            println!("Optical parameters ([optics] table):");
            println!();
            for id in ParameterId::ALL {
                println!("  {:<40} {:>10} {:<8}", id.name(), defaults.get(id), id.unit());
            }
            println!();
            println!("Comparison metrics: mean_squared_error, peak_normalized_mean_squared_error,");
            println!("                    normalized_cross_correlation (default)");
            Ok(())
        }
    }
}
