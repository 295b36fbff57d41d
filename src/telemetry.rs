//! Query events for observability.
//!
//! Every answered query produces one [`AgentEvent`]. Events always go to the
//! local `tracing` log and, when configured, are also posted as JSON to a
//! remote collector. A sink that fails only logs a warning; it never changes
//! the answer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::TelemetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Error,
}

/// Outcome of one query.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub event: EventKind,
    pub message: &'static str,
    pub session_id: Uuid,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn processed(session_id: Uuid, query: &str, output: &str) -> Self {
        Self {
            event: EventKind::Info,
            message: "Math query processed",
            session_id,
            query: query.to_string(),
            output: Some(output.to_string()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(session_id: Uuid, query: &str, error: &str) -> Self {
        Self {
            event: EventKind::Error,
            message: "Math query failed",
            session_id,
            query: query.to_string(),
            output: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for query events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: &AgentEvent);

    /// Wait until events recorded so far have been delivered.
    async fn flush(&self) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn record(&self, event: &AgentEvent) {
        match event.event {
            EventKind::Info => tracing::info!(
                session_id = %event.session_id,
                query = %event.query,
                output = event.output.as_deref().unwrap_or_default(),
                "{}",
                event.message
            ),
            EventKind::Error => tracing::error!(
                session_id = %event.session_id,
                query = %event.query,
                error = event.error.as_deref().unwrap_or_default(),
                "{}",
                event.message
            ),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    service: &'static str,
    environment: &'a str,
    #[serde(flatten)]
    event: &'a AgentEvent,
}

/// Posts events as JSON to an HTTP collector.
///
/// Each export runs on its own task, so a slow collector never delays the
/// answer.
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    environment: String,
    in_flight: Arc<InFlight>,
}

/// Count of exports still running.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl HttpEventSink {
    pub fn new(
        endpoint: String,
        token: String,
        environment: String,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
            environment,
            in_flight: Arc::default(),
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn record(&self, event: &AgentEvent) {
        let body = match serde_json::to_value(Envelope {
            service: env!("CARGO_PKG_NAME"),
            environment: &self.environment,
            event,
        }) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to serialize event: {}", e);
                return;
            }
        };
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body);
        let endpoint = self.endpoint.clone();
        let in_flight = self.in_flight.clone();
        in_flight.count.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let result = request.send().await.and_then(|r| r.error_for_status());
            if let Err(e) = result {
                tracing::warn!("Failed to export event to {}: {}", endpoint, e);
            }
            in_flight.finish();
        });
    }

    async fn flush(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Sends every event to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn record(&self, event: &AgentEvent) {
        for sink in &self.sinks {
            sink.record(event).await;
        }
    }

    async fn flush(&self) {
        for sink in &self.sinks {
            sink.flush().await;
        }
    }
}

/// Build the sink described by `config`: the local log, plus the remote
/// collector when both endpoint and token are set.
pub fn sink_from_config(config: &TelemetryConfig) -> Arc<dyn EventSink> {
    let (Some(endpoint), Some(token)) = (&config.endpoint, &config.token) else {
        return Arc::new(TracingSink);
    };

    match HttpEventSink::new(endpoint.clone(), token.clone(), config.environment.clone()) {
        Ok(remote) => {
            tracing::info!("Exporting query events to {}", endpoint);
            let sinks = vec![
                Arc::new(TracingSink) as Arc<dyn EventSink>,
                Arc::new(remote) as Arc<dyn EventSink>,
            ];
            Arc::new(FanoutSink::new(sinks))
        }
        Err(e) => {
            tracing::warn!("Event export disabled: {}", e);
            Arc::new(TracingSink)
        }
    }
}

/// Keeps events in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    events: std::sync::Mutex<Vec<AgentEvent>>,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for MemorySink {
    async fn record(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
