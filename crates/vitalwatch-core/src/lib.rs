//! Vital-sign ingestion and evaluation pipeline
//!
//! Readings flow from one or more [`Source`]s into a bounded per-patient
//! [`HistoryStore`], and the newest reading of every cycle is graded by the
//! [`BaselineEvaluator`] and scored by the [`AnomalyGateway`]. The
//! [`IngestionCoordinator`] ties these together and returns an [`Analysis`]
//! per cycle.
//!
//! # Example
//!
//! ```rust,ignore
//! use vitalwatch_core::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::from_file("vitalwatch.toml")?.with_env_overrides()?;
//! let pipeline = Pipeline::from_config(&config)?;
//!
//! if let Some(analysis) = pipeline.coordinator().cycle().await {
//!     for alert in &analysis.alerts {
//!         println!("{}: {}", alert.severity, alert.message);
//!     }
//! }
//! ```

pub mod anomaly;
pub mod baseline;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod reading;
pub mod sink;
pub mod source;
pub mod store;

pub use anomaly::{AnomalyError, AnomalyGateway, AnomalyModel, AnomalyVerdict, ZScoreModel};
pub use baseline::{Alert, BaselineEvaluator, BaselineTable, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PipelineConfig, SourceConfig};
pub use coordinator::{Analysis, CycleDiagnostic, IngestionCoordinator};
pub use error::{Error, Result};
pub use history::{HistoryConfig, HistoryStore};
pub use pipeline::Pipeline;
pub use reading::{Gender, Reading, ValidationError, VitalSign, Vitals};
pub use sink::{ChannelSink, DeliverySink, HttpSink};
pub use source::{FetchBatch, Source, SourceError};
pub use store::{ReadingStore, SledReadingStore, StoreError};
