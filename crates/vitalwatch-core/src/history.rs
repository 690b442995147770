//! Per-patient bounded reading history
//!
//! Each patient owns an arrival-ordered sequence guarded by its own lock, so
//! writers for different patients never contend with each other. The outer
//! map lock is only taken exclusively to add a new patient or to drop a
//! patient whose sequence became empty after an eviction sweep.
//!
//! Readers always receive copies taken under a read lock: a concurrent sweep
//! can never expose a partially evicted sequence.
//!
//! Expired readings are removed lazily. A sweep runs from inside
//! [`HistoryStore::append`] (or [`HistoryStore::tick`]) at most once per
//! cleanup interval, which bounds growth between sweeps to roughly
//! `retention / sampling interval` readings per patient.

use crate::clock::{system_clock, Clock};
use crate::reading::Reading;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Errors raised by history import/export
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid history configuration: {0}")]
    Configuration(String),
}

/// Retention settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum age of a retained reading, in seconds
    pub retention_secs: u64,
    /// Minimum spacing between eviction sweeps, in seconds
    pub cleanup_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 60 * 60,
            cleanup_interval_secs: 30 * 60,
        }
    }
}

/// Upper bound for `retention_secs` and `cleanup_interval_secs` (ten years)
pub const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

impl HistoryConfig {
    /// Retention window as a duration
    pub fn retention(&self) -> Result<Duration, HistoryError> {
        seconds("retention_secs", self.retention_secs)
    }

    /// Sweep spacing as a duration
    pub fn cleanup_interval(&self) -> Result<Duration, HistoryError> {
        seconds("cleanup_interval_secs", self.cleanup_interval_secs)
    }

    /// Reject zero or out-of-range durations
    pub fn validate(&self) -> Result<(), HistoryError> {
        self.retention()?;
        self.cleanup_interval()?;
        Ok(())
    }
}

fn seconds(field: &str, secs: u64) -> Result<Duration, HistoryError> {
    if secs == 0 || secs > MAX_RETENTION_SECS {
        return Err(HistoryError::Configuration(format!(
            "{} must be within 1..={}, got {}",
            field, MAX_RETENTION_SECS, secs
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| HistoryError::Configuration(format!("{} is out of range: {}", field, secs)))
}

/// `now - window`, saturating at the earliest representable instant
fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

type Sequence = RwLock<VecDeque<Reading>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Thread-safe rolling history of readings, keyed by patient id
#[derive(Debug)]
pub struct HistoryStore {
    retention: Duration,
    cleanup_interval: Duration,
    clock: Arc<dyn Clock>,
    patients: RwLock<HashMap<String, Sequence>>,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryConfig::default(), system_clock())
    }
}

impl HistoryStore {
    /// Create a store, rejecting zero or out-of-range durations
    pub fn try_new(config: HistoryConfig, clock: Arc<dyn Clock>) -> Result<Self, HistoryError> {
        let retention = config.retention()?;
        let cleanup_interval = config.cleanup_interval()?;
        let now = clock.now();
        Ok(Self {
            retention,
            cleanup_interval,
            clock,
            patients: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(now),
        })
    }

    /// Create a store with the given retention and clock
    ///
    /// Durations are clamped to `1..=MAX_RETENTION_SECS` seconds.
    pub fn new(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        let clamped = HistoryConfig {
            retention_secs: config.retention_secs.clamp(1, MAX_RETENTION_SECS),
            cleanup_interval_secs: config.cleanup_interval_secs.clamp(1, MAX_RETENTION_SECS),
        };
        let now = clock.now();
        Self {
            retention: clamped.retention().unwrap_or_else(|_| Duration::days(1)),
            cleanup_interval: clamped.cleanup_interval().unwrap_or_else(|_| Duration::minutes(30)),
            clock,
            patients: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(now),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Append a reading to its patient's sequence, in arrival order
    ///
    /// May trigger an eviction sweep if the cleanup interval has elapsed.
    pub fn append(&self, reading: Reading) {
        {
            let patients = read(&self.patients);
            if let Some(sequence) = patients.get(reading.patient_id()) {
                write(sequence).push_back(reading);
                drop(patients);
                self.tick();
                return;
            }
        }

        {
            let mut patients = write(&self.patients);
            let sequence = patients
                .entry(reading.patient_id().to_string())
                .or_insert_with(|| RwLock::new(VecDeque::new()));
            sequence
                .get_mut()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(reading);
        }
        self.tick();
    }

    /// Run an eviction sweep if one is due; returns the number evicted
    pub fn tick(&self) -> usize {
        let now = self.clock.now();
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if now - *last < self.cleanup_interval {
                return 0;
            }
            *last = now;
        }
        self.evict_expired(now)
    }

    /// Remove readings older than `now - retention` from every patient
    pub(crate) fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = cutoff(now, self.retention);
        let mut evicted = 0;
        let mut emptied = Vec::new();

        {
            let patients = read(&self.patients);
            for (patient_id, sequence) in patients.iter() {
                let mut sequence = write(sequence);
                let before = sequence.len();
                sequence.retain(|r| r.timestamp() >= cutoff);
                evicted += before - sequence.len();
                if sequence.is_empty() {
                    emptied.push(patient_id.clone());
                }
            }
        }

        if !emptied.is_empty() {
            let mut patients = write(&self.patients);
            for patient_id in emptied {
                let still_empty = patients
                    .get(&patient_id)
                    .map(|s| read(s).is_empty())
                    .unwrap_or(false);
                if still_empty {
                    patients.remove(&patient_id);
                }
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, cutoff = %cutoff, "Evicted expired readings");
        }
        evicted
    }

    /// Readings for a patient no older than `window`, in stored order
    pub fn query(&self, patient_id: &str, window: Duration) -> Vec<Reading> {
        let cutoff = cutoff(self.clock.now(), window);
        let patients = read(&self.patients);
        patients
            .get(patient_id)
            .map(|sequence| {
                read(sequence)
                    .iter()
                    .filter(|r| r.timestamp() >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Readings for a patient within the retention window
    pub fn query_retained(&self, patient_id: &str) -> Vec<Reading> {
        self.query(patient_id, self.retention)
    }

    /// Most recently appended reading for a patient
    pub fn latest(&self, patient_id: &str) -> Option<Reading> {
        let patients = read(&self.patients);
        patients
            .get(patient_id)
            .and_then(|sequence| read(sequence).back().cloned())
    }

    /// Ids of all patients with stored readings
    pub fn patients(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.patients).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of stored readings for a patient
    pub fn len(&self, patient_id: &str) -> usize {
        read(&self.patients)
            .get(patient_id)
            .map(|s| read(s).len())
            .unwrap_or(0)
    }

    /// Number of stored readings across all patients
    pub fn total_len(&self) -> usize {
        read(&self.patients).values().map(|s| read(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Drop every stored reading
    pub fn clear(&self) {
        write(&self.patients).clear();
    }

    /// Write a patient's stored readings to a JSON file
    ///
    /// Returns the number of readings written; an unknown patient writes
    /// nothing and returns 0.
    pub fn export_json(&self, patient_id: &str, path: impl AsRef<Path>) -> Result<usize, HistoryError> {
        let readings = {
            let patients = read(&self.patients);
            match patients.get(patient_id) {
                Some(sequence) => read(sequence).iter().cloned().collect::<Vec<_>>(),
                None => return Ok(0),
            }
        };

        let json = serde_json::to_string_pretty(&readings)?;
        std::fs::write(path, json)?;
        Ok(readings.len())
    }

    /// Append readings from a JSON file written by [`export_json`](Self::export_json)
    ///
    /// A missing file is not an error and imports nothing.
    pub fn import_json(&self, path: impl AsRef<Path>) -> Result<usize, HistoryError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No history file to import");
            return Ok(0);
        }

        let content = std::fs::read_to_string(path)?;
        let readings: Vec<Reading> = serde_json::from_str(&content)?;
        let count = readings.len();
        for reading in readings {
            self.append(reading);
        }
        Ok(count)
    }
}
