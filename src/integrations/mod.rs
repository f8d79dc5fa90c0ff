//! # External Collaborators
//!
//! Everything the bridge talks to besides its two sockets.
//!
//! ## Key Components:
//! - **realtime**: credential exchange and AI socket connect
//! - **directory**: caller display-name lookup
//! - **outcome**: where finished-call records go
//! - **call_control**: ending the phone call through the provider's REST API
//! - **scheduling**: appointment phrase detection in caller transcripts
//!
//! Failures here are logged and never end a call on their own.

pub mod call_control;
pub mod directory;
pub mod outcome;
pub mod realtime;
pub mod scheduling;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::protocol::telephony::StreamStart;
use call_control::{CallControl, LogOnlyCallControl, TwilioCallControl};
use directory::{CallerDirectory, HttpCallerDirectory, NoDirectory};
use outcome::{JsonLinesSink, LogSink, OutcomeSink, WebhookSink};
use realtime::RealtimeClient;

/// Shared HTTP client for every collaborator.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(format!("realtime-call-bridge/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to initialize HTTP client")
}

/// The collaborators a call session uses, chosen once from configuration.
#[derive(Clone)]
pub struct Services {
    pub realtime: Arc<RealtimeClient>,
    pub directory: Arc<dyn CallerDirectory>,
    pub outcomes: Arc<dyn OutcomeSink>,
    pub call_control: Arc<dyn CallControl>,
    /// Custom stream parameter carrying the lookup id
    pub lookup_param: String,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = http_client(Duration::from_secs(config.realtime.request_timeout_secs))?;
        let integrations = &config.integrations;

        let directory: Arc<dyn CallerDirectory> = if integrations.caller_lookup_url.is_empty() {
            Arc::new(NoDirectory)
        } else {
            Arc::new(HttpCallerDirectory::new(http.clone(), integrations.caller_lookup_url.clone()))
        };

        let outcomes: Arc<dyn OutcomeSink> = if !integrations.outcome_webhook_url.is_empty() {
            Arc::new(WebhookSink::new(http.clone(), integrations.outcome_webhook_url.clone()))
        } else if !integrations.outcome_log_path.is_empty() {
            Arc::new(JsonLinesSink::new(&integrations.outcome_log_path))
        } else {
            Arc::new(LogSink)
        };

        let call_control: Arc<dyn CallControl> =
            if integrations.twilio_account_sid.is_empty() || integrations.twilio_auth_token.is_empty() {
                Arc::new(LogOnlyCallControl)
            } else {
                Arc::new(TwilioCallControl::new(
                    http.clone(),
                    integrations.twilio_api_base.clone(),
                    integrations.twilio_account_sid.clone(),
                    integrations.twilio_auth_token.clone(),
                ))
            };

        info!(
            caller_lookup = !integrations.caller_lookup_url.is_empty(),
            outcome_webhook = !integrations.outcome_webhook_url.is_empty(),
            outcome_file = !integrations.outcome_log_path.is_empty(),
            call_control = !integrations.twilio_account_sid.is_empty(),
            "Integrations configured"
        );

        Ok(Self {
            realtime: Arc::new(RealtimeClient::new(http, config.realtime.clone())),
            directory,
            outcomes,
            call_control,
            lookup_param: integrations.caller_lookup_param.clone(),
        })
    }

    /// Display name for the caller on this stream. Lookup failures mean no name.
    pub async fn caller_name(&self, start: &StreamStart) -> Option<String> {
        let id = start.custom_parameters.get(&self.lookup_param)?;
        match self.directory.display_name(id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(stream_sid = %start.stream_sid, "Caller lookup failed: {}", e);
                None
            }
        }
    }
}
