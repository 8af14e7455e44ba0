//! Image comparison metrics.
//!
//! Every metric is a dissimilarity: zero for identical images, larger for
//! worse agreement. Only voxels that are finite in both images take part.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::types::SyntheticImage;

/// How a candidate is scored against the measured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMetric {
    /// Mean of squared voxel differences.
    MeanSquaredError,
    /// Mean squared error after dividing each image by its own maximum.
    PeakNormalizedMeanSquaredError,
    /// `1 - r` with `r` the Pearson correlation of the voxel values.
    #[default]
    NormalizedCrossCorrelation,
}

impl fmt::Display for ComparisonMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComparisonMetric::MeanSquaredError => "mean squared error",
            ComparisonMetric::PeakNormalizedMeanSquaredError => "peak-normalised mean squared error",
            ComparisonMetric::NormalizedCrossCorrelation => "normalised cross-correlation",
        };
        f.write_str(name)
    }
}

/// Dissimilarity of `candidate` with respect to `measured`; lower is better.
///
/// Geometries must agree exactly (see [`ImageGeometry::mismatch`]); images
/// are never cropped or resampled to fit each other.
///
/// [`ImageGeometry::mismatch`]: crate::types::ImageGeometry::mismatch
pub fn compare(
    measured: &SyntheticImage,
    candidate: &SyntheticImage,
    metric: ComparisonMetric,
) -> Result<f64, ConfigurationError> {
    if let Some(difference) = measured.geometry().mismatch(candidate.geometry()) {
        return Err(ConfigurationError::GeometryMismatch(difference));
    }

    let pairs: Vec<(f64, f64)> = measured
        .data()
        .iter()
        .zip(candidate.data().iter())
        .filter(|(m, c)| m.is_finite() && c.is_finite())
        .map(|(&m, &c)| (m, c))
        .collect();
    if pairs.is_empty() {
        return Err(ConfigurationError::EmptyOverlap);
    }

    let score = match metric {
        ComparisonMetric::MeanSquaredError => mean_squared(&pairs, 1.0, 1.0),
        ComparisonMetric::PeakNormalizedMeanSquaredError => {
            let peak = |select: fn(&(f64, f64)) -> f64| {
                pairs.iter().map(select).fold(f64::NEG_INFINITY, f64::max)
            };
            let scale = |p: f64| if p > 0.0 { 1.0 / p } else { 1.0 };
            mean_squared(&pairs, scale(peak(|p| p.0)), scale(peak(|p| p.1)))
        }
        ComparisonMetric::NormalizedCrossCorrelation => 1.0 - correlation(&pairs),
    };
    Ok(score)
}

fn mean_squared(pairs: &[(f64, f64)], scale_m: f64, scale_c: f64) -> f64 {
    let sum: f64 = pairs
        .iter()
        .map(|&(m, c)| {
            let d = m * scale_m - c * scale_c;
            d * d
        })
        .sum();
    sum / pairs.len() as f64
}

/// Pearson correlation. A constant image correlates with nothing (`r = 0`)
/// unless both are constant and equal.
fn correlation(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len() as f64;
    let mean_m = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_c = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_m, mut var_c) = (0.0, 0.0, 0.0);
    for &(m, c) in pairs {
        let dm = m - mean_m;
        let dc = c - mean_c;
        cov += dm * dc;
        var_m += dm * dm;
        var_c += dc * dc;
    }

    if var_m == 0.0 || var_c == 0.0 {
        let identical = var_m == var_c && pairs.iter().all(|&(m, c)| m == c);
        return if identical { 1.0 } else { 0.0 };
    }
    cov / (var_m.sqrt() * var_c.sqrt())
}
