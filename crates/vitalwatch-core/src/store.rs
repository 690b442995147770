//! Optional persistent backing store for readings
//!
//! Only two operations are needed by the pipeline: append a reading and
//! fetch a patient's readings within a time range. The sled-backed store
//! keys records as `patient_id 0x00 timestamp_micros sequence`, so a range
//! query is a single ordered key scan.

use crate::reading::Reading;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from the backing store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid patient id: {0}")]
    InvalidKey(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Append-and-range persistence for readings
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync + std::fmt::Debug {
    /// Persist a reading
    async fn append(&self, reading: &Reading) -> StoreResult<()>;

    /// Readings for a patient with `start <= timestamp <= end`, oldest first
    async fn range(
        &self,
        patient_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Reading>>;
}

/// Map a signed timestamp onto an order-preserving unsigned key component
fn time_key(ts: DateTime<Utc>) -> [u8; 8] {
    ((ts.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

fn patient_prefix(patient_id: &str) -> StoreResult<Vec<u8>> {
    if patient_id.as_bytes().contains(&0) {
        return Err(StoreError::InvalidKey(patient_id.escape_debug().to_string()));
    }
    let mut prefix = Vec::with_capacity(patient_id.len() + 1);
    prefix.extend_from_slice(patient_id.as_bytes());
    prefix.push(0);
    Ok(prefix)
}

/// sled-backed [`ReadingStore`]
#[derive(Debug, Clone)]
pub struct SledReadingStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledReadingStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    /// Open a throwaway store that is removed on drop
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let tree = db.open_tree("readings")?;
        Ok(Self { db, tree })
    }

    /// Number of stored readings
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> StoreResult<()> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReadingStore for SledReadingStore {
    async fn append(&self, reading: &Reading) -> StoreResult<()> {
        let mut key = patient_prefix(reading.patient_id())?;
        key.extend_from_slice(&time_key(reading.timestamp()));
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());

        let value = serde_json::to_vec(reading)?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    async fn range(
        &self,
        patient_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Reading>> {
        if start > end {
            return Ok(Vec::new());
        }

        let prefix = patient_prefix(patient_id)?;
        let mut lo = prefix.clone();
        lo.extend_from_slice(&time_key(start));
        let mut hi = prefix;
        hi.extend_from_slice(&time_key(end));
        hi.extend_from_slice(&u64::MAX.to_be_bytes());

        let mut readings = Vec::new();
        for entry in self.tree.range(lo..=hi) {
            let (_, value) = entry?;
            readings.push(serde_json::from_slice(&value)?);
        }
        Ok(readings)
    }
}

/// In-memory [`ReadingStore`] for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    readings: RwLock<HashMap<String, Vec<Reading>>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn append(&self, reading: &Reading) -> StoreResult<()> {
        self.readings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(reading.patient_id().to_string())
            .or_default()
            .push(reading.clone());
        Ok(())
    }

    async fn range(
        &self,
        patient_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Reading>> {
        let readings = self.readings.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Reading> = readings
            .get(patient_id)
            .map(|all| {
                all.iter()
                    .filter(|r| r.timestamp() >= start && r.timestamp() <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|r| r.timestamp());
        Ok(found)
    }
}
