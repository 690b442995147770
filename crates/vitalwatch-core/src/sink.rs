//! Delivery sinks for sensor-origin readings
//!
//! A sink forwards a reading somewhere else and reports whether that worked.
//! Sinks never return errors: failures are logged and surface as `false`, so
//! a broken uplink cannot interrupt ingestion.

use crate::reading::Reading;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport-agnostic delivery contract
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync + fmt::Debug {
    /// Returns the unique name of this sink
    fn name(&self) -> &str;

    /// Deliver a reading; `true` on success
    async fn send(&self, reading: &Reading) -> bool;
}

/// Posts readings as JSON to `<base_url>/vital_signs`
#[derive(Debug)]
pub struct HttpSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSink {
    /// Create a sink for the given server
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}/vital_signs", base_url.as_ref().trim_end_matches('/')),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl DeliverySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, reading: &Reading) -> bool {
        match self.client.post(&self.endpoint).json(reading).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    status = %response.status(),
                    "Delivery rejected"
                );
                false
            }
            Err(e) => {
                tracing::error!(endpoint = %self.endpoint, error = %e, "HTTP send error");
                false
            }
        }
    }
}

/// Publishes readings onto an in-process bounded queue
#[derive(Debug, Clone)]
pub struct ChannelSink {
    topic: String,
    sender: mpsc::Sender<Reading>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its queue
    pub fn new(topic: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Reading>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                topic: topic.into(),
                sender,
            },
            receiver,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait::async_trait]
impl DeliverySink for ChannelSink {
    fn name(&self) -> &str {
        &self.topic
    }

    async fn send(&self, reading: &Reading) -> bool {
        match self.sender.try_send(reading.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "Queue publish error");
                false
            }
        }
    }
}
