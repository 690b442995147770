//! Tabular (CSV) file source
//!
//! The file is re-read on every fetch. The header is checked once at
//! construction so that a missing file or a missing required column is a
//! configuration error rather than something discovered mid-run.
//!
//! # Example
//!
//! ```rust,ignore
//! use vitalwatch_core::source::{CsvSource, Source};
//!
//! let source = CsvSource::from_file("vitals.csv")?;
//! let batch = source.fetch().await?;
//! println!("{} readings, {} skipped", batch.len(), batch.skipped.len());
//! ```

use super::traits::{FetchBatch, Source, SourceError, SourceResult};
use crate::reading::{Reading, ReadingRecord};
use std::io;
use std::path::{Path, PathBuf};

/// Columns that must be present in the header row
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "timestamp",
    "patient_id",
    "age",
    "heart_rate",
    "temperature",
    "spo2",
    "respiratory_rate",
    "systolic_bp",
    "diastolic_bp",
];

/// Reads vital-sign rows from a CSV file
#[derive(Debug)]
pub struct CsvSource {
    name: String,
    path: PathBuf,
}

impl CsvSource {
    /// Create a source from a CSV file, validating its header
    pub fn from_file(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(SourceError::Configuration(format!(
                "CSV file not found: {}",
                path.display()
            )));
        }

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| SourceError::Configuration(format!("{}: {}", path.display(), e)))?;
        let headers = reader
            .headers()
            .map_err(|e| SourceError::Configuration(format!("{}: {}", path.display(), e)))?;

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|column| !headers.iter().any(|h| h.trim() == *column))
            .collect();
        if !missing.is_empty() {
            return Err(SourceError::Configuration(format!(
                "{} is missing required columns: {}",
                path.display(),
                missing.join(", ")
            )));
        }

        Ok(Self {
            name: format!("csv:{}", path.display()),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row, skipping the ones that fail to parse or validate
    pub fn read_all(&self) -> SourceResult<FetchBatch> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
            .clone();

        let mut batch = FetchBatch::empty();
        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(SourceError::Unavailable(e.to_string())),
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or_default();
                    batch.skip(format!("line {}", line), e.to_string());
                    continue;
                }
            };

            let location = format!(
                "line {}",
                record.position().map(|p| p.line()).unwrap_or_default()
            );
            match record.deserialize::<ReadingRecord>(Some(&headers)) {
                Ok(raw) => batch.admit(location, Reading::try_from(raw)),
                Err(e) => batch.skip(location, e.to_string()),
            }
        }

        tracing::debug!(
            source = %self.name,
            admitted = batch.len(),
            skipped = batch.skipped.len(),
            "Read CSV file"
        );
        Ok(batch)
    }
}

#[async_trait::async_trait]
impl Source for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> SourceResult<FetchBatch> {
        self.read_all()
    }
}

/// Write readings in the tabular format accepted by [`CsvSource`]
pub fn write_readings<W: io::Write>(writer: W, readings: &[Reading]) -> SourceResult<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for reading in readings {
        writer
            .serialize(ReadingRecord::from(reading.clone()))
            .map_err(|e| SourceError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    }
    writer.flush()?;
    Ok(())
}
