// SPDX-License-Identifier: AGPL-3.0
//! SIEM sink payload shapes and the wire transport each one speaks.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::audit::AuditEvent;

#[async_trait]
pub trait SiemSink: Send + Sync {
    fn name(&self) -> &str;
    /// Serialize a batch of events into this sink's wire payload and send
    /// it. Returns the HTTP status on success so callers can classify
    /// retryable failures.
    async fn send(&self, events: &[AuditEvent]) -> anyhow::Result<()>;
}

/// Splunk HTTP Event Collector-style payload: one `{event, sourcetype,
/// time}` envelope per audit event, newline-delimited.
#[derive(Serialize)]
struct HecEnvelope<'a> {
    time: f64,
    sourcetype: &'a str,
    event: &'a AuditEvent,
}

pub struct HecSink {
    pub name: String,
    pub endpoint: String,
    pub token: String,
    pub sourcetype: String,
    client: reqwest::Client,
}

impl HecSink {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, token: impl Into<String>, sourcetype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            token: token.into(),
            sourcetype: sourcetype.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn encode(&self, events: &[AuditEvent]) -> String {
        events
            .iter()
            .map(|e| {
                let envelope = HecEnvelope {
                    time: e.timestamp.timestamp_millis() as f64 / 1000.0,
                    sourcetype: &self.sourcetype,
                    event: e,
                };
                serde_json::to_string(&envelope).unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl SiemSink for HecSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        let body = self.encode(events);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Splunk {}", self.token))
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("hec sink '{}' returned {}", self.name, response.status());
        }
        Ok(())
    }
}

/// Tag-log-style sink (Datadog/CloudWatch-Logs shape): each event becomes a
/// line of space-separated `key=value` tags plus a `message` field.
pub struct TagLogSink {
    pub name: String,
    pub endpoint: String,
    pub api_key: String,
    client: reqwest::Client,
}

impl TagLogSink {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn encode(&self, events: &[AuditEvent]) -> Value {
        let logs: Vec<Value> = events
            .iter()
            .map(|e| {
                let tags = format!(
                    "event_type:{:?},severity:{:?},resource:{},correlation_id:{}",
                    e.event_type,
                    e.severity,
                    e.resource_id.map(|r| r.to_string()).unwrap_or_default(),
                    e.correlation_id.map(|c| c.to_string()).unwrap_or_default(),
                );
                serde_json::json!({
                    "ddsource": "sark-gateway",
                    "ddtags": tags,
                    "message": serde_json::to_string(e).unwrap_or_default(),
                })
            })
            .collect();
        Value::Array(logs)
    }
}

#[async_trait]
impl SiemSink for TagLogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, events: &[AuditEvent]) -> anyhow::Result<()> {
        let body = self.encode(events);
        let response = self
            .client
            .post(&self.endpoint)
            .header("DD-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("tag-log sink '{}' returned {}", self.name, response.status());
        }
        Ok(())
    }
}
