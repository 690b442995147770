//! Core traits for reading sources
//!
//! Every source, whether it reads a file, calls a remote endpoint or
//! synthesises samples, implements [`Source`]. The coordinator only ever sees
//! this trait, so sources can be composed in any order.

use crate::reading::{Reading, ValidationError};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when fetching from a source
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source is temporarily unreachable; retry later
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// A single record could not be decoded or validated
    #[error("Malformed record at {location}: {reason}")]
    MalformedRecord { location: String, reason: String },

    /// The whole response had the wrong shape (e.g. not a JSON array)
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The source is misconfigured; fatal for this source only
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The fetch did not finish within its budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error (for file-based sources)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the caller may reasonably retry on a later cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Unavailable(_) | SourceError::Timeout(_) | SourceError::Io(_)
        )
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// A record that was dropped during a fetch
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    /// Where the record came from (row number, array index, sensor id)
    pub location: String,
    /// Why it was skipped
    pub reason: String,
}

impl SkippedRecord {
    pub fn new(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Convert into the per-record error variant
    pub fn into_error(self) -> SourceError {
        SourceError::MalformedRecord {
            location: self.location,
            reason: self.reason,
        }
    }
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.reason)
    }
}

/// Outcome of a single fetch: admitted readings plus the skip report
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub readings: Vec<Reading>,
    pub skipped: Vec<SkippedRecord>,
}

impl FetchBatch {
    /// An empty batch
    pub fn empty() -> Self {
        Self::default()
    }

    /// A batch holding the given readings
    pub fn of(readings: Vec<Reading>) -> Self {
        Self {
            readings,
            skipped: Vec::new(),
        }
    }

    /// Admit a decoded record, or note why it was skipped
    pub fn admit(&mut self, location: impl Into<String>, result: Result<Reading, ValidationError>) {
        match result {
            Ok(reading) => self.readings.push(reading),
            Err(e) => self.skip(location, e.to_string()),
        }
    }

    /// Record a skipped record, logging the reason
    pub fn skip(&mut self, location: impl Into<String>, reason: impl Into<String>) {
        let record = SkippedRecord::new(location, reason);
        tracing::warn!(
            location = %record.location,
            reason = %record.reason,
            "Skipping malformed record"
        );
        self.skipped.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }
}

/// Core trait for reading sources
///
/// Implementations must be cheap to call repeatedly and thread-safe; the
/// coordinator calls `fetch` once per cycle.
///
/// # Error Handling
///
/// A source returns `Ok` with an empty batch when it simply has nothing to
/// report. Malformed records are reported in the batch, not as errors.
/// `Err` is reserved for whole-fetch failures (unreachable endpoint,
/// unreadable file, malformed payload), which the coordinator logs before
/// moving on to the next source.
#[async_trait::async_trait]
pub trait Source: Send + Sync + fmt::Debug {
    /// Returns the unique name of this source
    fn name(&self) -> &str;

    /// Fetch zero or more readings
    async fn fetch(&self) -> SourceResult<FetchBatch>;
}
