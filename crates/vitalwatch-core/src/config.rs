//! Pipeline configuration
//!
//! Configuration is a single document with one section per component:
//!
//! ```toml
//! [history]
//! retention_secs = 86400
//! cleanup_interval_secs = 1800
//!
//! [baseline]
//! path = "baselines.json"
//!
//! [anomaly]
//! model_path = "model.json"
//!
//! [coordinator]
//! poll_interval_ms = 1000
//!
//! [[sources]]
//! type = "csv"
//! path = "ward.csv"
//!
//! [[sources]]
//! type = "simulated"
//! abnormal_probability = 0.2
//! ```
//!
//! The format is chosen from the file extension (`.toml`, `.yaml`/`.yml`,
//! `.json`). Scalar settings can be overridden from the environment with
//! variables named `VITALWATCH__<SECTION>__<KEY>`, e.g.
//! `VITALWATCH__COORDINATOR__POLL_INTERVAL_MS=250`.

use crate::anomaly::DEFAULT_THRESHOLD;
use crate::baseline::EvaluatorConfig;
use crate::history::HistoryConfig;
use crate::reading::Gender;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "VITALWATCH";

/// Separator between prefix, section and key
pub const ENV_SEPARATOR: &str = "__";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format}: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Unknown file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid override {key}: {message}")]
    EnvOverride { key: String, message: String },
}

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "toml" => Ok(ConfigFormat::Toml),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat(extension)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Json => "JSON",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Baseline document; no path means no baseline comparison
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Saved z-score model; no path means no anomaly scoring
    pub model_path: Option<PathBuf>,
    /// Threshold used when training a new model
    pub threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub poll_interval_ms: u64,
    pub source_timeout_ms: u64,
    /// Capacity of the results channel used by `run`
    pub channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            source_timeout_ms: 5000,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sled database directory; no path means no persistence
    pub path: Option<PathBuf>,
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_abnormal_probability() -> f64 {
    0.2
}

fn default_sensor_patient() -> String {
    "default".to_string()
}

fn default_noise_level() -> f64 {
    0.1
}

/// A configured reading source, in priority order within `sources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Csv {
        path: PathBuf,
    },
    Http {
        url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Simulated {
        #[serde(default = "default_min_interval_ms")]
        min_interval_ms: u64,
        #[serde(default = "default_abnormal_probability")]
        abnormal_probability: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Sensor {
        #[serde(default = "default_sensor_patient")]
        patient_id: String,
        #[serde(default)]
        age: Option<u32>,
        #[serde(default)]
        gender: Option<Gender>,
        #[serde(default = "default_noise_level")]
        noise_level: f64,
        #[serde(default)]
        seed: Option<u64>,
        /// Server that receives every sensor reading at `/vital_signs`
        #[serde(default)]
        deliver_to: Option<String>,
    },
}

impl SourceConfig {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Csv { .. } => "csv",
            SourceConfig::Http { .. } => "http",
            SourceConfig::Simulated { .. } => "simulated",
            SourceConfig::Sensor { .. } => "sensor",
        }
    }

    pub fn simulated() -> Self {
        SourceConfig::Simulated {
            min_interval_ms: default_min_interval_ms(),
            abnormal_probability: default_abnormal_probability(),
            seed: None,
        }
    }

    pub fn sensor(patient_id: impl Into<String>) -> Self {
        SourceConfig::Sensor {
            patient_id: patient_id.into(),
            age: None,
            gender: None,
            noise_level: default_noise_level(),
            seed: None,
            deliver_to: None,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub history: HistoryConfig,
    pub baseline: BaselineConfig,
    pub anomaly: AnomalyConfig,
    pub coordinator: CoordinatorConfig,
    pub storage: StorageConfig,
    pub evaluator: EvaluatorConfig,
    pub sources: Vec<SourceConfig>,
}

impl PipelineConfig {
    /// Load a configuration file, detecting the format from its extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, format)
    }

    /// Parse a configuration document
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            format: format.name(),
            message,
        };

        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Apply `VITALWATCH__<SECTION>__<KEY>` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs
    ///
    /// Names without the prefix are ignored. Values are read as JSON
    /// scalars when possible (`250`, `true`, `null`) and as strings
    /// otherwise. The `sources` list cannot be overridden this way.
    pub fn with_overrides<I, K, V>(self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut doc = serde_json::to_value(&self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let mut applied = 0;

        for (name, value) in vars {
            let name = name.as_ref();
            let Some((section, key)) = parse_env_name(name) else {
                continue;
            };

            if section == "sources" {
                return Err(ConfigError::EnvOverride {
                    key: name.to_string(),
                    message: "sources cannot be overridden from the environment".to_string(),
                });
            }

            let target = doc
                .get_mut(&section)
                .and_then(JsonValue::as_object_mut)
                .ok_or_else(|| ConfigError::EnvOverride {
                    key: name.to_string(),
                    message: format!("unknown section '{}'", section),
                })?;
            if !target.contains_key(&key) {
                return Err(ConfigError::EnvOverride {
                    key: name.to_string(),
                    message: format!("unknown key '{}' in section '{}'", key, section),
                });
            }

            target.insert(key, parse_env_value(value.as_ref()));
            applied += 1;
        }

        if applied > 0 {
            tracing::debug!(applied, "Applied environment overrides");
        }

        serde_json::from_value(doc).map_err(|e| ConfigError::EnvOverride {
            key: ENV_PREFIX.to_string(),
            message: e.to_string(),
        })
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(e) = self.history.validate() {
            problems.push(format!("history: {}", e));
        }
        if self.coordinator.poll_interval_ms == 0 {
            problems.push("coordinator.poll_interval_ms must be positive".to_string());
        }
        if self.coordinator.source_timeout_ms == 0 {
            problems.push("coordinator.source_timeout_ms must be positive".to_string());
        }
        if self.coordinator.channel_capacity == 0 {
            problems.push("coordinator.channel_capacity must be positive".to_string());
        }
        if !self.anomaly.threshold.is_finite() || self.anomaly.threshold <= 0.0 {
            problems.push(format!(
                "anomaly.threshold must be a positive number, got {}",
                self.anomaly.threshold
            ));
        }

        for (i, source) in self.sources.iter().enumerate() {
            match source {
                SourceConfig::Csv { path } if path.as_os_str().is_empty() => {
                    problems.push(format!("sources[{}]: csv path must not be empty", i));
                }
                SourceConfig::Http { url, timeout_ms, .. } => {
                    if url.trim().is_empty() {
                        problems.push(format!("sources[{}]: http url must not be empty", i));
                    }
                    if *timeout_ms == Some(0) {
                        problems.push(format!("sources[{}]: timeout_ms must be positive", i));
                    }
                }
                SourceConfig::Simulated {
                    abnormal_probability, ..
                } if !(0.0..=1.0).contains(abnormal_probability) => {
                    problems.push(format!(
                        "sources[{}]: abnormal_probability must be within [0, 1], got {}",
                        i, abnormal_probability
                    ));
                }
                SourceConfig::Sensor {
                    patient_id,
                    noise_level,
                    ..
                } => {
                    if patient_id.trim().is_empty() {
                        problems.push(format!("sources[{}]: sensor patient_id must not be empty", i));
                    }
                    if !noise_level.is_finite() || *noise_level < 0.0 {
                        problems.push(format!("sources[{}]: noise_level must be non-negative", i));
                    }
                }
                _ => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

/// Split `VITALWATCH__SECTION__KEY` into lowercase `(section, key)`
fn parse_env_name(name: &str) -> Option<(String, String)> {
    let rest = name
        .to_uppercase()
        .strip_prefix(&format!("{}{}", ENV_PREFIX, ENV_SEPARATOR))?
        .to_string();
    let (section, key) = rest.split_once(ENV_SEPARATOR)?;
    if section.is_empty() || key.is_empty() {
        return None;
    }
    Some((section.to_lowercase(), key.to_lowercase()))
}

fn parse_env_value(raw: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(value @ (JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::Null)) => value,
        _ => JsonValue::String(raw.to_string()),
    }
}
