//! Per-feature z-score model
//!
//! A reading is anomalous when any feature lies more than `threshold`
//! standard deviations from its fitted mean. Confidence is the logistic of
//! the excess over the threshold, so a reading exactly on the threshold
//! scores 0.5.

use super::{AnomalyError, AnomalyModel, FeatureStats, FeatureVector, ModelPrediction};
use crate::reading::VitalSign;
use crate::source::simulated::standard_normal;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of standard deviations tolerated
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Mean and spread of resting vitals used for synthetic training data
const RESTING_PROFILE: [(f64, f64); 6] = [
    (75.0, 10.0),
    (37.0, 0.5),
    (98.0, 1.0),
    (16.0, 2.0),
    (120.0, 10.0),
    (80.0, 5.0),
];

/// Draw `n` feature vectors from the resting profile, clamped to the
/// admissible bounds of each sign
pub fn synthetic_training_set<R: Rng>(rng: &mut R, n: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|_| {
            let mut values = [0.0; 6];
            for sign in VitalSign::ALL {
                let (mean, std_dev) = RESTING_PROFILE[sign.index()];
                let (lo, hi) = sign.bounds();
                values[sign.index()] = (mean + standard_normal(rng) * std_dev).clamp(lo, hi);
            }
            FeatureVector::new(values)
        })
        .collect()
}

/// Threshold model over fitted per-feature statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreModel {
    threshold: f64,
    stats: Option<Vec<FeatureStats>>,
    #[serde(default)]
    trained_samples: usize,
}

impl Default for ZScoreModel {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ZScoreModel {
    /// Create an unfitted model
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            stats: None,
            trained_samples: 0,
        }
    }

    /// Create a model from known statistics
    pub fn from_stats(threshold: f64, stats: Vec<FeatureStats>) -> Result<Self, AnomalyError> {
        if stats.len() != VitalSign::ALL.len() {
            return Err(AnomalyError::Training(format!(
                "expected {} feature statistics, got {}",
                VitalSign::ALL.len(),
                stats.len()
            )));
        }
        Ok(Self {
            threshold,
            stats: Some(stats),
            trained_samples: 0,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_fitted(&self) -> bool {
        self.stats.is_some()
    }

    pub fn trained_samples(&self) -> usize {
        self.trained_samples
    }

    /// Fit mean and population standard deviation per feature
    pub fn train(&mut self, samples: &[FeatureVector]) -> Result<(), AnomalyError> {
        if samples.len() < 2 {
            return Err(AnomalyError::Training(format!(
                "need at least 2 samples, got {}",
                samples.len()
            )));
        }

        let n = samples.len() as f64;
        let stats = VitalSign::ALL
            .iter()
            .map(|&sign| {
                let mean = samples.iter().map(|s| s.get(sign)).sum::<f64>() / n;
                let variance = samples
                    .iter()
                    .map(|s| (s.get(sign) - mean).powi(2))
                    .sum::<f64>()
                    / n;
                FeatureStats {
                    mean,
                    std_dev: variance.sqrt(),
                }
            })
            .collect();

        self.stats = Some(stats);
        self.trained_samples = samples.len();
        tracing::info!(samples = samples.len(), threshold = self.threshold, "Trained z-score model");
        Ok(())
    }

    /// Persist as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AnomalyError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a model written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnomalyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AnomalyError::ModelUnavailable(format!("no model at {}", path.display()))
            } else {
                AnomalyError::Io(e)
            }
        })?;
        let model: Self = serde_json::from_str(&content)?;
        if let Some(ref stats) = model.stats {
            if stats.len() != VitalSign::ALL.len() {
                return Err(AnomalyError::Training(format!(
                    "model file {} has {} feature statistics",
                    path.display(),
                    stats.len()
                )));
            }
        }
        Ok(model)
    }
}

impl AnomalyModel for ZScoreModel {
    fn predict(&self, features: &FeatureVector) -> Result<ModelPrediction, AnomalyError> {
        let stats = self
            .stats
            .as_ref()
            .ok_or_else(|| AnomalyError::ModelUnavailable("model is not fitted".to_string()))?;

        let max_z = stats
            .iter()
            .zip(features.as_slice())
            .map(|(s, v)| s.deviation(*v))
            .fold(0.0_f64, f64::max);

        let confidence = 1.0 / (1.0 + (-(max_z - self.threshold)).exp());
        Ok(ModelPrediction {
            is_anomaly: max_z > self.threshold,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    fn feature_stats(&self) -> Option<Vec<FeatureStats>> {
        self.stats.clone()
    }
}
