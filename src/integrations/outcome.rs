//! Where finished-call records go.
//!
//! ## Sink Selection (first configured wins):
//! 1. **Webhook**: `POST` the record as JSON
//! 2. **JSON lines file**: append one record per line
//! 3. **Log**: emit the record at info level

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::bridge::outcome::CallOutcome;
use crate::error::IntegrationError;

#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record(&self, outcome: &CallOutcome) -> Result<(), IntegrationError>;
}

pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl OutcomeSink for WebhookSink {
    async fn record(&self, outcome: &CallOutcome) -> Result<(), IntegrationError> {
        let response = self.http.post(&self.url).json(outcome).send().await?;
        if !response.status().is_success() {
            return Err(IntegrationError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Append-only JSON lines file.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OutcomeSink for JsonLinesSink {
    async fn record(&self, outcome: &CallOutcome) -> Result<(), IntegrationError> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct LogSink;

#[async_trait]
impl OutcomeSink for LogSink {
    async fn record(&self, outcome: &CallOutcome) -> Result<(), IntegrationError> {
        info!(
            session_id = %outcome.session_id,
            outcome = ?outcome.outcome,
            duration_secs = outcome.duration_secs,
            appointment = ?outcome.appointment,
            "Call outcome: {}",
            serde_json::to_string(outcome)?
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::outcome::OutcomeKind;
    use chrono::Utc;

    fn outcome(session_id: &str) -> CallOutcome {
        CallOutcome {
            session_id: session_id.to_string(),
            stream_sid: Some("MZ1".to_string()),
            call_sid: None,
            started_at: Utc::now(),
            duration_secs: 12.5,
            transcript: "Agent: Hello".to_string(),
            outcome: OutcomeKind::Conversed,
            end_reason: "telephony_stopped".to_string(),
            appointment: None,
        }
    }

    #[tokio::test]
    async fn test_json_lines_appends() {
        let path = std::env::temp_dir().join(format!("outcomes-{}.jsonl", uuid::Uuid::new_v4()));
        let sink = JsonLinesSink::new(&path);

        sink.record(&outcome("a")).await.unwrap();
        sink.record(&outcome("b")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["session_id"], "a");
        assert_eq!(lines[1]["outcome"], "conversed");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_log_sink_accepts_record() {
        assert!(LogSink.record(&outcome("c")).await.is_ok());
    }
}
