//! End-to-end pipeline tests

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vitalwatch_core::anomaly::synthetic_training_set;
use vitalwatch_core::config::{ConfigFormat, SourceConfig};
use vitalwatch_core::coordinator::DiagnosticKind;
use vitalwatch_core::source::tabular::write_readings;
use vitalwatch_core::store::ReadingStore;
use vitalwatch_core::{
    Clock, Gender, HistoryConfig, HistoryStore, ManualClock, Pipeline, PipelineConfig, Reading,
    Severity, SledReadingStore, Vitals, ZScoreModel,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASELINES: &str = r#"{
    "heart_rate": {
        "adult": {
            "M": {"min": 60, "max": 100, "warning_max": 110},
            "F": {"min": 60, "max": 100, "warning_max": 110}
        }
    },
    "spo2": {
        "adult": {
            "M": {"min": 90, "max": 100, "warning_min": 95}
        }
    }
}"#;

fn vitals(heart_rate: f64, spo2: f64) -> Vitals {
    Vitals {
        heart_rate,
        temperature: 37.0,
        spo2,
        respiratory_rate: 16.0,
        systolic_bp: 120.0,
        diastolic_bp: 80.0,
    }
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn trained_model(&self) -> std::path::PathBuf {
        let mut rng = StdRng::seed_from_u64(9);
        let mut model = ZScoreModel::default();
        model.train(&synthetic_training_set(&mut rng, 2000)).unwrap();
        let path = self.dir.path().join("model.json");
        model.save(&path).unwrap();
        path
    }
}

#[tokio::test]
async fn test_csv_to_analysis() {
    let fixture = Fixture::new();
    let readings = vec![Reading::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        "P7",
        vitals(105.0, 93.0),
    )
    .unwrap()
    .with_age(50)
    .with_gender(Gender::Male)];

    let csv_path = fixture.dir.path().join("ward.csv");
    write_readings(std::fs::File::create(&csv_path).unwrap(), &readings).unwrap();

    let mut config = PipelineConfig::default();
    config.baseline.path = Some(fixture.write("baselines.json", BASELINES));
    config.anomaly.model_path = Some(fixture.trained_model());
    config.sources = vec![SourceConfig::Csv { path: csv_path }];

    let pipeline = Pipeline::from_config(&config).unwrap();
    let analysis = pipeline.coordinator().cycle().await.unwrap();

    assert_eq!(analysis.reading, readings[0]);
    assert_eq!(analysis.alerts.len(), 2);
    assert_eq!(analysis.alerts[0].severity, Severity::Warning);
    assert_eq!(analysis.alerts[0].message, "heart_rate is high");
    assert_eq!(analysis.alerts[1].message, "spo2 is low");

    let verdict = analysis.anomaly.expect("model is attached");
    assert!(verdict.is_anomaly);
    assert!((0.0..=1.0).contains(&verdict.confidence));
    assert_eq!(verdict.timestamp, readings[0].timestamp());
    assert!(analysis.diagnostics.is_empty());
}

#[tokio::test]
async fn test_http_source_with_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/readings"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"timestamp": "2024-05-01T08:00:00Z", "patient_id": "NET_1", "age": 30, "gender": "F",
             "heart_rate": 72, "temperature": 36.9, "spo2": 99, "respiratory_rate": 14,
             "systolic_bp": 115, "diastolic_bp": 75},
            {"timestamp": "not a time", "patient_id": "NET_2",
             "heart_rate": 72, "temperature": 36.9, "spo2": 99, "respiratory_rate": 14,
             "systolic_bp": 115, "diastolic_bp": 75}
        ])))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
sources:
  - type: http
    url: "{}/down"
    timeout_ms: 500
  - type: http
    url: "{}/readings"
    api_key: token-1
"#,
        server.uri(),
        server.uri()
    );
    let config = PipelineConfig::parse(&yaml, ConfigFormat::Yaml).unwrap();
    let pipeline = Pipeline::from_config(&config).unwrap();

    let analysis = pipeline.coordinator().cycle().await.unwrap();
    assert_eq!(analysis.reading.patient_id(), "NET_1");
    assert_eq!(analysis.reading.gender(), Some(Gender::Female));

    let kinds: Vec<DiagnosticKind> = analysis.diagnostics.iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&DiagnosticKind::SourceFailed));
    assert!(kinds.contains(&DiagnosticKind::RecordsSkipped));
    assert!(kinds.contains(&DiagnosticKind::ModelUnavailable));
}

#[tokio::test]
async fn test_persistent_store_receives_readings() {
    let fixture = Fixture::new();
    let mut config = PipelineConfig::default();
    config.storage.path = Some(fixture.dir.path().join("db"));
    config.sources = vec![SourceConfig::Simulated {
        min_interval_ms: 0,
        abnormal_probability: 0.5,
        seed: Some(3),
    }];

    let start = Utc::now() - ChronoDuration::seconds(1);
    let patient = {
        let pipeline = Pipeline::from_config(&config).unwrap();
        let analysis = pipeline.coordinator().cycle().await.unwrap();
        analysis.reading.patient_id().to_string()
    };

    let store = SledReadingStore::open(fixture.dir.path().join("db")).unwrap();
    let stored = store
        .range(&patient, start, Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_history_retention_with_manual_clock() {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let history = HistoryStore::new(
        HistoryConfig {
            retention_secs: 3600,
            cleanup_interval_secs: 600,
        },
        clock.clone(),
    );

    for minute in 0..120 {
        let ts = start + ChronoDuration::minutes(minute);
        clock.set(ts);
        history.append(Reading::new(ts, "P1", vitals(70.0, 98.0)).unwrap());
    }

    // Sweeps run at most every 10 minutes, so up to 10 stale readings remain
    let stored = history.len("P1");
    assert!((60..=71).contains(&stored), "stored {}", stored);

    clock.advance(ChronoDuration::minutes(10));
    history.tick();
    let cutoff = clock.now() - ChronoDuration::hours(1);
    let retained = history.query("P1", ChronoDuration::days(1));
    assert!(retained.iter().all(|r| r.timestamp() >= cutoff));
    assert_eq!(retained.len(), 51);
}

#[test]
fn test_config_file_with_env_overrides() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"coordinator": {{"poll_interval_ms": 2000}}, "sources": [{{"type": "sensor", "patient_id": "BED_2"}}]}}"#
    )
    .unwrap();
    file.flush().unwrap();

    let config = PipelineConfig::from_file(file.path())
        .unwrap()
        .with_overrides([("VITALWATCH__COORDINATOR__POLL_INTERVAL_MS", "100")])
        .unwrap();
    let pipeline = Pipeline::from_config(&config).unwrap();

    assert_eq!(pipeline.poll_interval(), Duration::from_millis(100));
    assert_eq!(pipeline.coordinator().source_names(), vec!["sensor:BED_2"]);
}
