//! Calibration of free optical parameters against a measured volume.
//!
//! The optimiser treats a [`ForwardModel`] as an expensive oracle: each
//! evaluation synthesises a candidate on the measured geometry and scores it
//! with [`compare`]. Free parameters are searched by a bounded Nelder-Mead
//! simplex in coordinates normalised to each parameter's bounds, so every
//! candidate it proposes lies inside the bounds.
//!
//! ```text
//! Initialized ──run──▶ Iterating ──▶ Converged | Exhausted | Stopped | Failed
//! ```

mod simplex;

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ConfigurationError, NumericWarning};
use crate::objective::{compare, ComparisonMetric};
use crate::synthesis::{ForwardModel, PsfModel, SynthesisError, SynthesisSettings};
use crate::types::{OpticalParameters, ParameterId, SyntheticImage};

use simplex::Simplex;

/// A parameter the optimiser may change, with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeParameter {
    pub parameter: ParameterId,
    pub lower: f64,
    pub upper: f64,
}

impl FreeParameter {
    pub fn new(parameter: ParameterId, lower: f64, upper: f64) -> Self {
        Self { parameter, lower, upper }
    }

    fn normalize(&self, value: f64) -> f64 {
        (value - self.lower) / (self.upper - self.lower)
    }

    fn denormalize(&self, t: f64) -> f64 {
        self.lower + t * (self.upper - self.lower)
    }
}

/// Iteration and tolerance budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationBudget {
    pub max_iterations: usize,
    /// Objective spread across the simplex below which it counts as flat.
    pub f_tolerance: f64,
    /// Simplex size in normalised coordinates below which it counts as
    /// collapsed.
    pub x_tolerance: f64,
    /// Edge length of the start simplex in normalised coordinates.
    pub initial_step: f64,
}

impl Default for OptimizationBudget {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            f_tolerance: 1e-10,
            x_tolerance: 1e-4,
            initial_step: 0.1,
        }
    }
}

/// Everything one calibration run needs.
#[derive(Debug, Clone)]
pub struct OptimizationProblem {
    /// Target volume; candidates are synthesised on its geometry.
    pub measured: SyntheticImage,
    /// Initial guess; non-free fields stay fixed at these values.
    pub initial: OpticalParameters,
    pub free: Vec<FreeParameter>,
    pub metric: ComparisonMetric,
    pub budget: OptimizationBudget,
    pub model: PsfModel,
    pub settings: SynthesisSettings,
}

impl OptimizationProblem {
    /// A problem with the default metric, budget, model and settings.
    pub fn new(measured: SyntheticImage, initial: OpticalParameters, free: Vec<FreeParameter>) -> Self {
        Self {
            measured,
            initial,
            free,
            metric: ComparisonMetric::default(),
            budget: OptimizationBudget::default(),
            model: PsfModel::default(),
            settings: SynthesisSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.initial.validate()?;
        self.measured.geometry().validate()?;
        self.settings.validate()?;

        if self.free.is_empty() {
            return Err(ConfigurationError::InvalidProblem("no free parameters".into()));
        }
        for (i, free) in self.free.iter().enumerate() {
            let id = free.parameter;
            if self.free[..i].iter().any(|f| f.parameter == id) {
                return Err(ConfigurationError::InvalidProblem(format!("{id} is listed twice")));
            }
            if !free.lower.is_finite() || !free.upper.is_finite() || free.lower >= free.upper {
                return Err(ConfigurationError::InvalidProblem(format!(
                    "{id} bounds [{}, {}] must be finite with lower < upper",
                    free.lower, free.upper
                )));
            }
            let value = self.initial.get(id);
            if value < free.lower || value > free.upper {
                return Err(ConfigurationError::InvalidProblem(format!(
                    "initial {id} = {value} lies outside [{}, {}]",
                    free.lower, free.upper
                )));
            }
        }

        let b = &self.budget;
        if b.max_iterations == 0 {
            return Err(ConfigurationError::InvalidProblem("max_iterations must be at least 1".into()));
        }
        for (name, value) in [("f_tolerance", b.f_tolerance), ("x_tolerance", b.x_tolerance)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidProblem(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !(b.initial_step > 0.0 && b.initial_step <= 1.0) {
            return Err(ConfigurationError::InvalidProblem(format!(
                "initial_step must lie in (0, 1], got {}",
                b.initial_step
            )));
        }
        Ok(())
    }

    /// Parameter record for a point in normalised coordinates.
    fn parameters_at(&self, x: &[f64]) -> OpticalParameters {
        self.free
            .iter()
            .zip(x)
            .fold(self.initial.clone(), |params, (free, &t)| {
                params.with(free.parameter, free.denormalize(t))
            })
    }
}

/// Lifecycle of an [`Optimizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerState {
    Initialized,
    Iterating,
    Converged,
    Exhausted,
    Stopped,
    Failed,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Both tolerances met.
    Converged,
    /// Iteration budget spent first; the best parameters are still usable.
    Exhausted,
    /// The iteration hook asked to stop.
    Stopped,
}

/// Progress snapshot passed to the iteration hook.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub evaluations: usize,
    pub best_score: f64,
    pub best_parameters: OpticalParameters,
    pub value_spread: f64,
    pub simplex_diameter: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub parameters: OpticalParameters,
    pub score: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub status: OptimizationStatus,
    /// Warnings raised while synthesising the best candidate.
    pub warnings: Vec<NumericWarning>,
}

impl OptimizationResult {
    pub fn converged(&self) -> bool {
        self.status == OptimizationStatus::Converged
    }

    /// Final value of every free parameter, in problem order.
    pub fn free_values(&self, free: &[FreeParameter]) -> Vec<(ParameterId, f64)> {
        free.iter()
            .map(|f| (f.parameter, self.parameters.get(f.parameter)))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum OptimizationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Evaluation {evaluation} failed: {source}")]
    Evaluation {
        evaluation: usize,
        #[source]
        source: SynthesisError,
    },
}

/// Counts evaluations and remembers the best candidate seen so far.
struct Evaluator<'a> {
    problem: &'a OptimizationProblem,
    evaluations: usize,
    best: Option<(f64, Vec<NumericWarning>)>,
}

impl Evaluator<'_> {
    fn evaluate(&mut self, x: &[f64]) -> Result<f64, OptimizationError> {
        self.evaluations += 1;
        let evaluation = self.evaluations;
        let problem = self.problem;
        let params = problem.parameters_at(x);

        let output = problem
            .model
            .synthesize(&params, problem.measured.geometry(), &problem.settings)
            .map_err(|source| OptimizationError::Evaluation { evaluation, source })?;
        let score = compare(&problem.measured, &output.image, problem.metric).map_err(|e| {
            OptimizationError::Evaluation {
                evaluation,
                source: SynthesisError::Configuration(e),
            }
        })?;
        let score = if score.is_nan() { f64::INFINITY } else { score };

        if self.best.as_ref().map_or(true, |(best, _)| score < *best) {
            self.best = Some((score, output.warnings));
        }
        Ok(score)
    }
}

/// Runs one [`OptimizationProblem`] through the state machine.
#[derive(Debug)]
pub struct Optimizer {
    problem: OptimizationProblem,
    state: OptimizerState,
}

impl Optimizer {
    /// Validate the problem; nothing is synthesised yet.
    pub fn new(problem: OptimizationProblem) -> Result<Self, OptimizationError> {
        problem.validate()?;
        Ok(Self {
            problem,
            state: OptimizerState::Initialized,
        })
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    pub fn problem(&self) -> &OptimizationProblem {
        &self.problem
    }

    pub fn run(&mut self) -> Result<OptimizationResult, OptimizationError> {
        self.run_with(|_| ControlFlow::Continue(()))
    }

    /// Run to completion, calling `hook` after every iteration. Returning
    /// `ControlFlow::Break` ends the run with [`OptimizationStatus::Stopped`].
    ///
    /// An optimiser runs once; a second call is a configuration error.
    pub fn run_with<H>(&mut self, mut hook: H) -> Result<OptimizationResult, OptimizationError>
    where
        H: FnMut(&IterationReport) -> ControlFlow<()>,
    {
        if self.state != OptimizerState::Initialized {
            return Err(ConfigurationError::InvalidProblem(format!(
                "optimizer already ran (state {:?})",
                self.state
            ))
            .into());
        }
        self.state = OptimizerState::Iterating;
        log::info!(
            "Optimising {} free parameter(s) with {} ({})",
            self.problem.free.len(),
            self.problem.model.model_name(),
            self.problem.metric
        );

        match drive(&self.problem, &mut hook) {
            Ok(result) => {
                self.state = match result.status {
                    OptimizationStatus::Converged => OptimizerState::Converged,
                    OptimizationStatus::Exhausted => OptimizerState::Exhausted,
                    OptimizationStatus::Stopped => OptimizerState::Stopped,
                };
                Ok(result)
            }
            Err(e) => {
                self.state = OptimizerState::Failed;
                log::error!("Optimisation failed: {e}");
                Err(e)
            }
        }
    }
}

fn drive<H>(problem: &OptimizationProblem, hook: &mut H) -> Result<OptimizationResult, OptimizationError>
where
    H: FnMut(&IterationReport) -> ControlFlow<()>,
{
    let budget = problem.budget;
    let start: Vec<f64> = problem
        .free
        .iter()
        .map(|f| f.normalize(problem.initial.get(f.parameter)))
        .collect();

    let mut evaluator = Evaluator {
        problem,
        evaluations: 0,
        best: None,
    };
    let mut simplex =
        Simplex::new(&start, budget.initial_step, &mut |x: &[f64]| evaluator.evaluate(x))?;

    let mut status = OptimizationStatus::Exhausted;
    let mut iterations = 0;
    while iterations < budget.max_iterations {
        let step = simplex.iterate(&mut |x: &[f64]| evaluator.evaluate(x))?;
        iterations += 1;

        let (x, best_score) = simplex.best();
        let report = IterationReport {
            iteration: iterations,
            evaluations: evaluator.evaluations,
            best_score,
            best_parameters: problem.parameters_at(x),
            value_spread: simplex.value_spread(),
            simplex_diameter: simplex.diameter(),
        };
        log::debug!(
            "Iteration {iterations}: {step:?}, best {best_score:.6e}, spread {:.3e}, diameter {:.3e}",
            report.value_spread,
            report.simplex_diameter
        );

        let converged = report.value_spread <= budget.f_tolerance
            && report.simplex_diameter <= budget.x_tolerance;
        let flow = hook(&report);
        if converged {
            status = OptimizationStatus::Converged;
            break;
        }
        if flow.is_break() {
            status = OptimizationStatus::Stopped;
            break;
        }
    }

    let (x, score) = simplex.best();
    let parameters = problem.parameters_at(x);
    let warnings = evaluator.best.map(|(_, w)| w).unwrap_or_default();

    match status {
        OptimizationStatus::Converged => {
            log::info!("Converged after {iterations} iterations, score {score:.6e}")
        }
        OptimizationStatus::Exhausted => log::warn!(
            "No convergence within {} iterations; best score {score:.6e}",
            budget.max_iterations
        ),
        OptimizationStatus::Stopped => log::info!("Stopped after {iterations} iterations"),
    }

    Ok(OptimizationResult {
        parameters,
        score,
        iterations,
        evaluations: evaluator.evaluations,
        status,
        warnings,
    })
}

/// Build and run an [`Optimizer`] without a hook.
pub fn optimize(problem: OptimizationProblem) -> Result<OptimizationResult, OptimizationError> {
    Optimizer::new(problem)?.run()
}
