//! Anomaly scoring
//!
//! The scoring model is pluggable: anything implementing [`AnomalyModel`] can
//! be attached to an [`AnomalyGateway`], and swapped while the pipeline is
//! running. The gateway turns a reading into a feature vector in stable
//! order, asks the model for a verdict and derives per-feature deviation
//! scores from the model's fitted statistics.

pub mod zscore;

pub use zscore::{synthetic_training_set, ZScoreModel, DEFAULT_THRESHOLD};

use crate::reading::{Reading, VitalSign, Vitals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors from anomaly scoring
#[derive(Error, Debug)]
pub enum AnomalyError {
    /// No model is attached, or the attached model has not been fitted
    #[error("Anomaly model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The six vital-sign values in feature order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; 6]);

impl FeatureVector {
    pub fn new(values: [f64; 6]) -> Self {
        Self(values)
    }

    pub fn from_vitals(vitals: &Vitals) -> Self {
        Self(vitals.to_array())
    }

    pub fn get(&self, sign: VitalSign) -> f64 {
        self.0[sign.index()]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Fitted statistics for one feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl FeatureStats {
    /// Absolute z-score of `value`; 0.0 when the spread is degenerate
    pub fn deviation(&self, value: f64) -> f64 {
        if !self.std_dev.is_finite() || self.std_dev <= 0.0 {
            return 0.0;
        }
        ((value - self.mean) / self.std_dev).abs()
    }
}

/// Raw model output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub is_anomaly: bool,
    pub confidence: f64,
}

/// Anomaly-scoring capability
#[cfg_attr(test, mockall::automock)]
pub trait AnomalyModel: Send + Sync {
    /// Score a feature vector
    fn predict(&self, features: &FeatureVector) -> Result<ModelPrediction, AnomalyError>;

    /// Per-feature mean and standard deviation in feature order, once fitted
    fn feature_stats(&self) -> Option<Vec<FeatureStats>>;
}

/// Verdict for a single reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    /// Probability-like confidence in [0, 1]
    pub confidence: f64,
    /// Absolute z-score per vital sign
    pub deviations: BTreeMap<VitalSign, f64>,
    pub timestamp: DateTime<Utc>,
    pub features: FeatureVector,
}

impl AnomalyVerdict {
    /// The vital sign deviating most from the fitted mean
    pub fn most_deviant(&self) -> Option<(VitalSign, f64)> {
        self.deviations
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(sign, score)| (*sign, *score))
    }
}

/// Adapter between readings and the attached [`AnomalyModel`]
#[derive(Default)]
pub struct AnomalyGateway {
    model: RwLock<Option<Arc<dyn AnomalyModel>>>,
}

impl fmt::Debug for AnomalyGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyGateway")
            .field("has_model", &self.has_model())
            .finish()
    }
}

impl AnomalyGateway {
    /// Create a gateway with no model attached
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: Arc<dyn AnomalyModel>) -> Self {
        Self {
            model: RwLock::new(Some(model)),
        }
    }

    /// Attach or replace the model; in-flight evaluations keep the old one
    pub fn set_model(&self, model: Arc<dyn AnomalyModel>) {
        *self.model.write().unwrap_or_else(|e| e.into_inner()) = Some(model);
        tracing::info!("Anomaly model attached");
    }

    /// Detach the model
    pub fn clear_model(&self) {
        *self.model.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn has_model(&self) -> bool {
        self.model
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn current(&self) -> Option<Arc<dyn AnomalyModel>> {
        self.model.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Score a reading
    pub fn evaluate(&self, reading: &Reading) -> Result<AnomalyVerdict, AnomalyError> {
        let model = self
            .current()
            .ok_or_else(|| AnomalyError::ModelUnavailable("no model attached".to_string()))?;
        let stats = model
            .feature_stats()
            .ok_or_else(|| AnomalyError::ModelUnavailable("model is not fitted".to_string()))?;
        if stats.len() != VitalSign::ALL.len() {
            return Err(AnomalyError::Prediction(format!(
                "expected {} feature statistics, model reported {}",
                VitalSign::ALL.len(),
                stats.len()
            )));
        }

        let features = FeatureVector::from_vitals(reading.vitals());
        let prediction = model.predict(&features)?;

        let deviations = VitalSign::ALL
            .iter()
            .map(|&sign| (sign, stats[sign.index()].deviation(features.get(sign))))
            .collect();

        let confidence = if prediction.confidence.is_finite() {
            prediction.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(AnomalyVerdict {
            is_anomaly: prediction.is_anomaly,
            confidence,
            deviations,
            timestamp: reading.timestamp(),
            features,
        })
    }
}
