//! Integration tests for parameter calibration.
//!
//! A volume synthesised from known parameters serves as the measurement;
//! the optimiser must recover the free parameter from a perturbed guess and
//! honour its budget, its hook and evaluation failures.

use std::ops::ControlFlow;

use approx::assert_relative_eq;

use umbra_core::error::ConfigurationError;
use umbra_core::objective::{compare, ComparisonMetric};
use umbra_core::optimizer::{
    optimize, FreeParameter, OptimizationError, OptimizationProblem, OptimizationStatus, Optimizer,
    OptimizerState,
};
use umbra_core::synthesis::{synthesize, SynthesisError, SynthesisSettings};
use umbra_core::types::{ImageGeometry, OpticalParameters, ParameterId, SyntheticImage};

const INDEX: ParameterId = ParameterId::ActualSpecimenLayerRefractiveIndex;

// ─────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────

fn truth() -> OpticalParameters {
    OpticalParameters {
        actual_specimen_layer_refractive_index: 1.44,
        actual_point_source_depth_nm: 2000.0,
        ..Default::default()
    }
}

fn fast_settings() -> SynthesisSettings {
    SynthesisSettings {
        pupil_intervals: 64,
        radial_interpolation: true,
        ..Default::default()
    }
}

fn measured() -> SyntheticImage {
    let geometry = ImageGeometry::centered([16, 16, 16], [100.0, 100.0, 200.0]);
    synthesize(&truth(), &geometry, &fast_settings()).unwrap().image
}

fn index_problem(start: f64) -> OptimizationProblem {
    let mut problem = OptimizationProblem::new(
        measured(),
        truth().with(INDEX, start),
        vec![FreeParameter::new(INDEX, 1.30, 1.50)],
    );
    problem.settings = fast_settings();
    problem
}

// ─────────────────────────────────────────────────────────────
// Recovery
// ─────────────────────────────────────────────────────────────

#[test]
fn test_recovers_specimen_index() {
    let problem = index_problem(1.48);
    let free = problem.free.clone();
    let result = optimize(problem).unwrap();

    assert!(result.converged(), "status {:?} after {} iterations", result.status, result.iterations);
    let recovered = result.free_values(&free)[0].1;
    let relative = (recovered - 1.44).abs() / 1.44;
    assert!(relative < 0.01, "recovered {recovered}");
    assert!(result.score < 1e-6);
    assert!(result.evaluations > result.iterations);
}

#[test]
fn test_recovers_aperture_and_specimen_index_together() {
    let truth = OpticalParameters {
        numerical_aperture: 1.3,
        actual_specimen_layer_refractive_index: 1.40,
        actual_point_source_depth_nm: 2000.0,
        ..Default::default()
    };
    let geometry = ImageGeometry::centered([16, 16, 16], [100.0, 100.0, 200.0]);
    let measured = synthesize(&truth, &geometry, &fast_settings()).unwrap().image;

    let start = truth
        .with(ParameterId::NumericalAperture, 1.34)
        .with(INDEX, 1.43);
    let free = vec![
        FreeParameter::new(ParameterId::NumericalAperture, 1.20, 1.45),
        FreeParameter::new(INDEX, 1.30, 1.50),
    ];
    let mut problem = OptimizationProblem::new(measured, start, free.clone());
    problem.settings = fast_settings();
    let result = optimize(problem).unwrap();

    assert!(result.converged(), "status {:?} after {} iterations", result.status, result.iterations);
    let values = result.free_values(&free);
    assert_relative_eq!(values[0].1, 1.3, max_relative = 1e-3);
    assert_relative_eq!(values[1].1, 1.40, max_relative = 1e-3);
    assert!(result.score < 1e-6);
    // fixed fields stay at the initial guess
    assert_eq!(
        result
            .parameters
            .with(ParameterId::NumericalAperture, 1.3)
            .with(INDEX, 1.40),
        truth
    );
}

#[test]
fn test_best_score_never_increases() {
    let mut optimizer = Optimizer::new(index_problem(1.48)).unwrap();
    let mut scores = Vec::new();
    optimizer
        .run_with(|report| {
            scores.push(report.best_score);
            ControlFlow::Continue(())
        })
        .unwrap();
    assert!(!scores.is_empty());
    for pair in scores.windows(2) {
        assert!(pair[1] <= pair[0]);
    }
}

#[test]
fn test_objective_is_zero_at_truth_only() {
    let measured = measured();
    let geometry = measured.geometry().clone();
    let same = synthesize(&truth(), &geometry, &fast_settings()).unwrap().image;
    let off = synthesize(&truth().with(INDEX, 1.36), &geometry, &fast_settings()).unwrap().image;
    let metric = ComparisonMetric::NormalizedCrossCorrelation;
    assert!(compare(&measured, &same, metric).unwrap() < 1e-12);
    assert!(compare(&measured, &off, metric).unwrap() > 1e-6);
}

// ─────────────────────────────────────────────────────────────
// Budget, hook and failure
// ─────────────────────────────────────────────────────────────

#[test]
fn test_small_budget_exhausts() {
    let mut problem = index_problem(1.48);
    problem.budget.max_iterations = 2;
    let mut optimizer = Optimizer::new(problem).unwrap();
    let result = optimizer.run().unwrap();

    assert_eq!(result.status, OptimizationStatus::Exhausted);
    assert_eq!(optimizer.state(), OptimizerState::Exhausted);
    assert_eq!(result.iterations, 2);
    let value = result.parameters.get(INDEX);
    assert!((1.30..=1.50).contains(&value));
    assert_eq!(result.parameters.with(INDEX, 1.44), truth());
}

#[test]
fn test_hook_stops_between_iterations() {
    let mut optimizer = Optimizer::new(index_problem(1.48)).unwrap();
    let mut seen = 0;
    let result = optimizer
        .run_with(|report| {
            seen += 1;
            assert_eq!(report.iteration, seen);
            if report.iteration == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::Stopped);
    assert_eq!(result.iterations, 3);
    assert_eq!(optimizer.state(), OptimizerState::Stopped);
}

#[test]
fn test_invalid_candidate_fails_run() {
    // a numerical aperture above the oil index is proposed by the first simplex
    let mut problem = index_problem(1.44);
    problem.initial = truth().with(ParameterId::NumericalAperture, 1.5);
    problem.free = vec![FreeParameter::new(ParameterId::NumericalAperture, 1.0, 1.6)];

    let mut optimizer = Optimizer::new(problem).unwrap();
    let err = optimizer.run().unwrap_err();
    assert_eq!(optimizer.state(), OptimizerState::Failed);
    match err {
        OptimizationError::Evaluation { evaluation, source } => {
            assert_eq!(evaluation, 2);
            assert!(matches!(
                source,
                SynthesisError::Configuration(ConfigurationError::ApertureExceedsIndex { .. })
            ));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_initial_guess_outside_bounds_rejected() {
    let problem = index_problem(1.55);
    assert!(matches!(
        Optimizer::new(problem),
        Err(OptimizationError::Configuration(ConfigurationError::InvalidProblem(_)))
    ));
}
