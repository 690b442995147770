//! Reading sources
//!
//! This module provides trait-based adapters for obtaining readings from
//! heterogeneous origins. All sources implement [`Source`], so the
//! coordinator can poll them uniformly and in priority order.
//!
//! # Supported Sources
//!
//! - **CSV files**: tabular exports, re-read on each fetch
//! - **HTTP endpoints**: JSON arrays of readings, with timeout and bearer auth
//! - **Simulated stream**: random readings at a bounded sampling cadence
//! - **Dummy sensor**: drifting, noisy sensor bank for a single patient
//!
//! # Example
//!
//! ```rust,ignore
//! use vitalwatch_core::source::{CsvSource, SimulatedSource, SimulationConfig};
//!
//! let csv = CsvSource::from_file("vitals.csv")?;
//! let sim = SimulatedSource::new(SimulationConfig::default())?;
//! coordinator.add_source(csv);
//! coordinator.add_source(sim);
//! ```

pub mod http;
pub mod sensor;
pub mod simulated;
pub mod tabular;
pub mod traits;

pub use http::HttpSource;
pub use sensor::{DummySensor, SensorConfig, SensorSample, SensorSource};
pub use simulated::{mock_dataset, SimulatedSource, SimulationConfig, MAX_DATASET_HOURS};
pub use tabular::CsvSource;
pub use traits::{FetchBatch, SkippedRecord, Source, SourceError, SourceResult};
