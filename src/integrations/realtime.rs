//! Realtime AI leg setup: credential exchange and socket connect.
//!
//! ## Setup Sequence:
//! 1. `POST {api_base}/realtime/sessions` with the API key, yielding a short-lived
//!    client secret
//! 2. Open `{ws_url}?model=...` with that secret as the bearer token
//! 3. Build the `session.update` / greeting pair for the bridge to send

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::config::RealtimeConfig;
use crate::error::SetupError;
use crate::protocol::realtime::{SessionConfig, SessionSetup, TranscriptionSettings, TurnDetection};

/// An open AI socket.
pub type AiStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CALLER_NAME_PLACEHOLDER: &str = "{caller_name}";
const UNKNOWN_CALLER: &str = "the caller";

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

/// Client for the realtime API.
pub struct RealtimeClient {
    http: reqwest::Client,
    config: RealtimeConfig,
    timeout: Duration,
}

impl RealtimeClient {
    pub fn new(http: reqwest::Client, config: RealtimeConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Self { http, config, timeout }
    }

    /// Exchange the API key for a short-lived client secret.
    pub async fn create_credential(&self) -> Result<String, SetupError> {
        if self.config.api_key.trim().is_empty() {
            return Err(SetupError::MissingApiKey);
        }

        let url = format!("{}/realtime/sessions", self.config.api_base.trim_end_matches('/'));
        debug!(%url, model = %self.config.model, "Requesting realtime credential");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "voice": self.config.voice,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SetupError::CredentialStatus(response.status().as_u16()));
        }

        let body: CredentialResponse = response.json().await?;
        Ok(body.client_secret.value)
    }

    /// Handshake request for the AI socket.
    pub fn connect_request(&self, credential: &str) -> Result<Request, SetupError> {
        let url = format!("{}?model={}", self.config.ws_url, self.config.model);
        let mut request = url.into_client_request()?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|e| SetupError::InvalidRequest(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("openai-beta", HeaderValue::from_static("realtime=v1"));

        Ok(request)
    }

    /// Open the AI socket, giving up after the configured request timeout.
    pub async fn connect(&self, credential: &str) -> Result<AiStream, SetupError> {
        let request = self.connect_request(credential)?;
        let (stream, _response) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| SetupError::Timeout(self.timeout))??;
        Ok(stream)
    }

    /// Session settings and greeting for one call.
    pub fn session_setup(&self, caller_name: Option<&str>) -> SessionSetup {
        let name = caller_name.unwrap_or(UNKNOWN_CALLER);
        let transcription = match self.config.transcription_model.trim() {
            "" => None,
            model => Some(TranscriptionSettings {
                model: model.to_string(),
            }),
        };

        SessionSetup {
            session: SessionConfig {
                modalities: vec!["audio".to_string(), "text".to_string()],
                instructions: self.config.instructions.replace(CALLER_NAME_PLACEHOLDER, name),
                voice: self.config.voice.clone(),
                input_audio_format: "pcm16".to_string(),
                output_audio_format: "pcm16".to_string(),
                input_audio_transcription: transcription,
                turn_detection: TurnDetection::server_vad(),
            },
            greeting: self.config.greeting.replace(CALLER_NAME_PLACEHOLDER, name),
        }
    }
}
