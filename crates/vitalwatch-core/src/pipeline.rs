//! Assembles a running pipeline from [`PipelineConfig`]
//!
//! Only an invalid configuration document is fatal. A component that fails
//! to initialise is left out with a logged error: a bad baseline file
//! disables baseline comparison, a missing model disables anomaly scoring, a
//! misconfigured source is dropped from the chain and an unopenable store
//! disables persistence.

use crate::anomaly::{AnomalyGateway, ZScoreModel};
use crate::baseline::{BaselineEvaluator, BaselineTable};
use crate::clock::{system_clock, Clock};
use crate::config::{PipelineConfig, SourceConfig};
use crate::coordinator::{Analysis, IngestionCoordinator};
use crate::history::HistoryStore;
use crate::sink::HttpSink;
use crate::source::{
    http::DEFAULT_TIMEOUT, CsvSource, HttpSource, SensorConfig, SensorSource, SimulatedSource,
    SimulationConfig, Source, SourceResult,
};
use crate::store::SledReadingStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Construct a single source from its configuration
pub fn build_source(config: &SourceConfig, clock: Arc<dyn Clock>) -> SourceResult<Arc<dyn Source>> {
    let source: Arc<dyn Source> = match config {
        SourceConfig::Csv { path } => Arc::new(CsvSource::from_file(path)?),
        SourceConfig::Http {
            url,
            api_key,
            timeout_ms,
        } => Arc::new(HttpSource::with_options(
            url.clone(),
            api_key.clone(),
            timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT),
        )?),
        SourceConfig::Simulated {
            min_interval_ms,
            abnormal_probability,
            seed,
        } => Arc::new(SimulatedSource::with_clock(
            SimulationConfig {
                min_interval: Duration::from_millis(*min_interval_ms),
                abnormal_probability: *abnormal_probability,
                seed: *seed,
            },
            clock,
        )?),
        SourceConfig::Sensor {
            patient_id,
            age,
            gender,
            noise_level,
            seed,
            deliver_to,
        } => {
            let mut source = SensorSource::with_clock(
                SensorConfig {
                    patient_id: patient_id.clone(),
                    age: *age,
                    gender: *gender,
                    noise_level: *noise_level,
                    seed: *seed,
                },
                clock,
            )?;
            if let Some(url) = deliver_to {
                match HttpSink::new(url, DEFAULT_TIMEOUT) {
                    Ok(sink) => source = source.with_sink(Arc::new(sink)),
                    Err(e) => tracing::warn!(url = %url, error = %e, "Sensor delivery disabled"),
                }
            }
            Arc::new(source)
        }
    };
    Ok(source)
}

/// A configured coordinator plus its run-loop settings
#[derive(Debug)]
pub struct Pipeline {
    coordinator: Arc<IngestionCoordinator>,
    poll_interval: Duration,
    channel_capacity: usize,
}

impl Pipeline {
    /// Build from configuration using the system clock
    pub fn from_config(config: &PipelineConfig) -> crate::Result<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Build from configuration with an explicit clock
    pub fn with_clock(config: &PipelineConfig, clock: Arc<dyn Clock>) -> crate::Result<Self> {
        config.validate()?;

        let history = Arc::new(HistoryStore::try_new(config.history, clock.clone())?);

        let table = match config.baseline.path {
            Some(ref path) => BaselineTable::load(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Invalid baseline file, using empty baselines");
                BaselineTable::new()
            }),
            None => BaselineTable::new(),
        };
        let evaluator = BaselineEvaluator::new(table).with_config(config.evaluator);

        let gateway = AnomalyGateway::new();
        if let Some(ref path) = config.anomaly.model_path {
            match ZScoreModel::load(path) {
                Ok(model) => gateway.set_model(Arc::new(model)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Anomaly scoring disabled"),
            }
        }

        let mut coordinator = IngestionCoordinator::new(history, evaluator, Arc::new(gateway))
            .with_source_timeout(Duration::from_millis(config.coordinator.source_timeout_ms));

        if let Some(ref path) = config.storage.path {
            match SledReadingStore::open(path) {
                Ok(store) => coordinator = coordinator.with_store(Arc::new(store)),
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Persistence disabled"),
            }
        }

        for (index, source_config) in config.sources.iter().enumerate() {
            match build_source(source_config, clock.clone()) {
                Ok(source) => {
                    tracing::info!(index, source = source.name(), "Registered source");
                    coordinator.add_arc_source(source);
                }
                Err(e) => tracing::error!(
                    index,
                    kind = source_config.kind(),
                    error = %e,
                    "Skipping misconfigured source"
                ),
            }
        }

        Ok(Self {
            coordinator: Arc::new(coordinator),
            poll_interval: Duration::from_millis(config.coordinator.poll_interval_ms),
            channel_capacity: config.coordinator.channel_capacity,
        })
    }

    pub fn coordinator(&self) -> &Arc<IngestionCoordinator> {
        &self.coordinator
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run the coordinator loop on a background task
    ///
    /// Returns the task handle (resolving to the number of analyses
    /// delivered) and the receiving end of the results channel.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> (JoinHandle<usize>, mpsc::Receiver<Analysis>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let coordinator = self.coordinator.clone();
        let poll_interval = self.poll_interval;
        let handle = tokio::spawn(async move { coordinator.run(poll_interval, shutdown, tx).await });
        (handle, rx)
    }
}
