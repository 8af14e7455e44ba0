//! Bead-spread function: the PSF averaged over a fluorescent sphere.

use serde::{Deserialize, Serialize};

use super::volume::SourceSample;
use crate::error::ConfigurationError;

/// A uniformly fluorescent bead centred on the point-source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeadModel {
    /// Bead radius (nm). Zero degenerates to the point-spread function.
    pub radius_nm: f64,
    /// Sample points per axis of the cubic lattice clipped to the sphere.
    pub samples_per_axis: usize,
}

impl Default for BeadModel {
    fn default() -> Self {
        Self {
            radius_nm: 85.0,
            samples_per_axis: 5,
        }
    }
}

impl BeadModel {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.radius_nm.is_finite() {
            return Err(ConfigurationError::NonFinite {
                parameter: "bead_radius_nm",
                value: self.radius_nm,
            });
        }
        if self.radius_nm < 0.0 {
            return Err(ConfigurationError::Negative {
                parameter: "bead_radius_nm",
                value: self.radius_nm,
            });
        }
        if self.samples_per_axis == 0 {
            return Err(ConfigurationError::InvalidSettings(
                "bead samples_per_axis must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Equal-weight sample points at the centres of lattice cells whose
    /// centre lies inside the sphere. Weights sum to one.
    pub(crate) fn source_samples(&self) -> Vec<SourceSample> {
        let n = self.samples_per_axis;
        if self.radius_nm == 0.0 || n == 1 {
            return vec![SourceSample::point()];
        }

        let r = self.radius_nm;
        let cell = 2.0 * r / n as f64;
        let coord = |i: usize| -r + (i as f64 + 0.5) * cell;

        let mut offsets = Vec::with_capacity(n * n * n);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let p = [coord(i), coord(j), coord(k)];
                    if p[0] * p[0] + p[1] * p[1] + p[2] * p[2] <= r * r {
                        offsets.push(p);
                    }
                }
            }
        }

        let weight = 1.0 / offsets.len() as f64;
        offsets
            .into_iter()
            .map(|offset_nm| SourceSample { offset_nm, weight })
            .collect()
    }
}
