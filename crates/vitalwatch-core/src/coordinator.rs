//! Ingestion coordinator
//!
//! Polls registered sources in priority order, records the winning reading
//! in the history (and the optional backing store), then grades it with the
//! baseline evaluator and the anomaly gateway.
//!
//! # Example
//!
//! ```rust,ignore
//! use vitalwatch_core::coordinator::IngestionCoordinator;
//!
//! let coordinator = IngestionCoordinator::new(history, evaluator, gateway)
//!     .with_source(CsvSource::from_file("ward.csv")?)  // Highest priority
//!     .with_source(SimulatedSource::new(Default::default())?);  // Fallback
//!
//! if let Some(analysis) = coordinator.cycle().await {
//!     println!("{} alerts", analysis.alerts.len());
//! }
//! ```

use crate::anomaly::{AnomalyError, AnomalyGateway, AnomalyVerdict};
use crate::baseline::{Alert, BaselineEvaluator, Severity};
use crate::history::HistoryStore;
use crate::reading::Reading;
use crate::source::Source;
use crate::store::ReadingStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Default budget for a single source fetch
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Category of a non-fatal problem seen during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    SourceFailed,
    SourceTimedOut,
    RecordsSkipped,
    ModelUnavailable,
    AnomalyFailed,
    StoreFailed,
}

/// A non-fatal problem observed during a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDiagnostic {
    pub kind: DiagnosticKind,
    /// Component that reported it (source name, "anomaly", "store")
    pub origin: String,
    pub message: String,
}

impl CycleDiagnostic {
    fn new(kind: DiagnosticKind, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CycleDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.kind, self.origin, self.message)
    }
}

/// Result of evaluating one reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub cycle_id: Uuid,
    /// Name of the source that supplied the reading
    pub source: String,
    pub reading: Reading,
    pub alerts: Vec<Alert>,
    pub anomaly: Option<AnomalyVerdict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<CycleDiagnostic>,
}

impl Analysis {
    /// Most severe alert, or `Normal` when there are none
    pub fn highest_severity(&self) -> Severity {
        self.alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Normal)
    }

    pub fn is_anomalous(&self) -> bool {
        self.anomaly.as_ref().map(|v| v.is_anomaly).unwrap_or(false)
    }
}

/// Orchestrates sources, history, baseline evaluation and anomaly scoring
pub struct IngestionCoordinator {
    sources: Vec<Arc<dyn Source>>,
    history: Arc<HistoryStore>,
    evaluator: BaselineEvaluator,
    gateway: Arc<AnomalyGateway>,
    store: Option<Arc<dyn ReadingStore>>,
    source_timeout: Duration,
}

impl fmt::Debug for IngestionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionCoordinator")
            .field("sources", &self.source_names())
            .field("source_timeout", &self.source_timeout)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl IngestionCoordinator {
    pub fn new(
        history: Arc<HistoryStore>,
        evaluator: BaselineEvaluator,
        gateway: Arc<AnomalyGateway>,
    ) -> Self {
        Self {
            sources: Vec::new(),
            history,
            evaluator,
            gateway,
            store: None,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }

    /// Register a source (builder pattern)
    ///
    /// Sources registered first have higher priority.
    pub fn with_source<S: Source + 'static>(mut self, source: S) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Register a source
    pub fn add_source<S: Source + 'static>(&mut self, source: S) {
        self.sources.push(Arc::new(source));
    }

    /// Register a pre-wrapped source
    pub fn add_arc_source(&mut self, source: Arc<dyn Source>) {
        self.sources.push(source);
    }

    /// Persist every processed reading to `store`
    pub fn with_store(mut self, store: Arc<dyn ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Source names in priority order
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn gateway(&self) -> &Arc<AnomalyGateway> {
        &self.gateway
    }

    pub fn evaluator(&self) -> &BaselineEvaluator {
        &self.evaluator
    }

    /// Run one ingestion cycle
    ///
    /// The first source to return a non-empty batch wins and its first
    /// reading is processed. Returns `None` when no source had data.
    pub async fn cycle(&self) -> Option<Analysis> {
        let cycle_id = Uuid::new_v4();
        let mut diagnostics = Vec::new();

        for source in &self.sources {
            let name = source.name();
            let batch = match tokio::time::timeout(self.source_timeout, source.fetch()).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    tracing::warn!(%cycle_id, source = name, error = %e, "Source fetch failed, trying next");
                    diagnostics.push(CycleDiagnostic::new(DiagnosticKind::SourceFailed, name, e.to_string()));
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        %cycle_id,
                        source = name,
                        timeout_ms = self.source_timeout.as_millis() as u64,
                        "Source fetch timed out, trying next"
                    );
                    diagnostics.push(CycleDiagnostic::new(
                        DiagnosticKind::SourceTimedOut,
                        name,
                        format!("no response within {:?}", self.source_timeout),
                    ));
                    continue;
                }
            };

            if !batch.skipped.is_empty() {
                let reasons: Vec<String> = batch.skipped.iter().map(|s| s.to_string()).collect();
                diagnostics.push(CycleDiagnostic::new(
                    DiagnosticKind::RecordsSkipped,
                    name,
                    format!("{} record(s) skipped: {}", reasons.len(), reasons.join("; ")),
                ));
            }

            if let Some(reading) = batch.readings.into_iter().next() {
                tracing::debug!(%cycle_id, source = name, patient_id = %reading.patient_id(), "Reading accepted");
                return Some(self.process(cycle_id, name.to_string(), reading, diagnostics).await);
            }
        }

        tracing::info!(%cycle_id, sources = self.sources.len(), "No data available from any source");
        None
    }

    /// Evaluate an externally supplied reading as if a source produced it
    pub async fn analyze(&self, reading: Reading) -> Analysis {
        self.process(Uuid::new_v4(), "external".to_string(), reading, Vec::new())
            .await
    }

    async fn process(
        &self,
        cycle_id: Uuid,
        source: String,
        reading: Reading,
        mut diagnostics: Vec<CycleDiagnostic>,
    ) -> Analysis {
        self.history.append(reading.clone());

        if let Some(ref store) = self.store {
            if let Err(e) = store.append(&reading).await {
                tracing::error!(%cycle_id, patient_id = %reading.patient_id(), error = %e, "Failed to persist reading");
                diagnostics.push(CycleDiagnostic::new(DiagnosticKind::StoreFailed, "store", e.to_string()));
            }
        }

        let alerts = self.evaluator.evaluate(&reading);

        let anomaly = match self.gateway.evaluate(&reading) {
            Ok(verdict) => Some(verdict),
            Err(AnomalyError::ModelUnavailable(reason)) => {
                tracing::debug!(%cycle_id, reason = %reason, "Anomaly evaluation skipped");
                diagnostics.push(CycleDiagnostic::new(DiagnosticKind::ModelUnavailable, "anomaly", reason));
                None
            }
            Err(e) => {
                tracing::warn!(%cycle_id, patient_id = %reading.patient_id(), error = %e, "Anomaly evaluation failed");
                diagnostics.push(CycleDiagnostic::new(DiagnosticKind::AnomalyFailed, "anomaly", e.to_string()));
                None
            }
        };

        let analysis = Analysis {
            cycle_id,
            source,
            reading,
            alerts,
            anomaly,
            diagnostics,
        };

        let severity = analysis.highest_severity();
        if severity > Severity::Normal || analysis.is_anomalous() {
            tracing::warn!(
                %cycle_id,
                patient_id = %analysis.reading.patient_id(),
                severity = %severity,
                anomaly = analysis.is_anomalous(),
                "Reading flagged"
            );
        }
        analysis
    }

    /// Drive [`cycle`](Self::cycle) every `poll_interval` until `shutdown`
    /// turns `true` or the results receiver is dropped
    ///
    /// A cycle already in progress is allowed to finish, but waiting for room
    /// in a full results channel ends on shutdown and drops that analysis.
    /// Returns the number of analyses delivered.
    pub async fn run(
        &self,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        results: mpsc::Sender<Analysis>,
    ) -> usize {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = 0;

        tracing::info!(sources = ?self.source_names(), interval_ms = poll_interval.as_millis() as u64, "Coordinator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Some(analysis) = self.cycle().await {
                        match reserve_slot(&results, &mut shutdown).await {
                            Some(permit) => {
                                permit.send(analysis);
                                delivered += 1;
                            }
                            None => break,
                        }
                    }
                }
            }
        }

        tracing::info!(delivered, "Coordinator stopped");
        delivered
    }
}

/// Wait for room in the results channel, giving up on shutdown
async fn reserve_slot<'a>(
    results: &'a mpsc::Sender<Analysis>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<mpsc::Permit<'a, Analysis>> {
    loop {
        tokio::select! {
            biased;
            permit = results.reserve() => {
                if permit.is_err() {
                    tracing::info!("Results receiver dropped");
                }
                return permit.ok();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::warn!("Shutdown while results were backed up, dropping analysis");
                    return None;
                }
            }
        }
    }
}
