//! Crate-level error type

use crate::anomaly::AnomalyError;
use crate::config::ConfigError;
use crate::history::HistoryError;
use crate::reading::ValidationError;
use crate::source::SourceError;
use crate::store::StoreError;
use thiserror::Error;

/// Any error raised by the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Anomaly error: {0}")]
    Anomaly(#[from] AnomalyError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether the error stems from bad input rather than the environment
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Config(_)
                | Error::History(HistoryError::Configuration(_))
                | Error::Source(SourceError::Configuration(_))
                | Error::Source(SourceError::MalformedRecord { .. })
                | Error::Source(SourceError::MalformedPayload(_))
        )
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
