//! Network (HTTP JSON) source
//!
//! Polls an endpoint that returns a JSON array of reading objects. Transport
//! failures never escape as panics or hang the pipeline: each request is
//! bounded by a timeout and any failure is reported as `Unavailable`.

use super::traits::{FetchBatch, Source, SourceError, SourceResult};
use crate::reading::{Reading, ReadingRecord};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches readings from a REST endpoint
#[derive(Debug)]
pub struct HttpSource {
    name: String,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source for the given endpoint
    pub fn new(url: impl Into<String>) -> SourceResult<Self> {
        Self::with_options(url, None, DEFAULT_TIMEOUT)
    }

    /// Create a source with an optional bearer token and explicit timeout
    pub fn with_options(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> SourceResult<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SourceError::Configuration(format!(
                "Unsupported URL scheme: {}",
                url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("http:{}", url),
            url,
            api_key,
            timeout,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Decode a JSON payload into a batch
///
/// A payload that is not an array is rejected as a whole; individual
/// elements that fail to decode or validate are skipped.
pub fn decode_payload(payload: JsonValue) -> SourceResult<FetchBatch> {
    let items = match payload {
        JsonValue::Array(items) => items,
        other => {
            return Err(SourceError::MalformedPayload(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut batch = FetchBatch::empty();
    for (index, item) in items.into_iter().enumerate() {
        let location = format!("item {}", index);
        match serde_json::from_value::<ReadingRecord>(item) {
            Ok(raw) => batch.admit(location, Reading::try_from(raw)),
            Err(e) => batch.skip(location, e.to_string()),
        }
    }
    Ok(batch)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[async_trait::async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> SourceResult<FetchBatch> {
        let mut request = self.client.get(&self.url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(format!("{} after {:?}", self.url, self.timeout))
            } else {
                SourceError::Unavailable(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "{} returned {}",
                self.url, status
            )));
        }

        let payload: JsonValue = response
            .json()
            .await
            .map_err(|e| SourceError::MalformedPayload(e.to_string()))?;

        let batch = decode_payload(payload)?;
        tracing::debug!(
            source = %self.name,
            admitted = batch.len(),
            skipped = batch.skipped.len(),
            "Fetched readings over HTTP"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(patient: &str, heart_rate: f64) -> JsonValue {
        json!({
            "timestamp": "2024-01-01T10:00:00",
            "patient_id": patient,
            "age": 50,
            "gender": "F",
            "heart_rate": heart_rate,
            "temperature": 37.0,
            "spo2": 97.0,
            "respiratory_rate": 16.0,
            "systolic_bp": 120.0,
            "diastolic_bp": 80.0
        })
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let err = HttpSource::new("ftp://example.com/vitals").unwrap_err();
        assert!(matches!(err, SourceError::Configuration(_)));
    }

    #[test]
    fn test_decode_non_array_payload() {
        let err = decode_payload(json!({"readings": []})).unwrap_err();
        assert!(matches!(err, SourceError::MalformedPayload(msg) if msg.contains("object")));
    }

    #[test]
    fn test_decode_skips_bad_elements() {
        let payload = json!([record("P1", 70.0), {"patient_id": "P2"}, record("P3", 300.0)]);
        let batch = decode_payload(payload).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.skipped.len(), 2);
        assert_eq!(batch.skipped[0].location, "item 1");
        assert_eq!(batch.skipped[1].location, "item 2");
    }

    #[tokio::test]
    async fn test_fetch_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vitals"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([record("P1", 75.0)])))
            .mount(&server)
            .await;

        let source = HttpSource::with_options(
            format!("{}/vitals", server.uri()),
            Some("secret".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();

        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.readings[0].patient_id(), "P1");
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpSource::new(format!("{}/vitals", server.uri())).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let source = HttpSource::with_options(
            format!("{}/vitals", server.uri()),
            None,
            Duration::from_millis(50),
        )
        .unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(err.is_transient());
    }
}
