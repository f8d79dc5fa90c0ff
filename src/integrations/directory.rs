//! Caller metadata lookup.
//!
//! The telephony provider passes an opaque id (e.g. a booking id) as a custom
//! stream parameter. The directory turns it into a display name used to
//! personalise the AI's instructions and greeting.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::IntegrationError;

#[async_trait]
pub trait CallerDirectory: Send + Sync {
    /// Display name for `id`, if the directory knows one.
    async fn display_name(&self, id: &str) -> Result<Option<String>, IntegrationError>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    name: Option<String>,
}

/// Looks callers up with `GET {url}?id=...`, expecting `{"name": "..."}`.
pub struct HttpCallerDirectory {
    http: reqwest::Client,
    url: String,
}

impl HttpCallerDirectory {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl CallerDirectory for HttpCallerDirectory {
    async fn display_name(&self, id: &str) -> Result<Option<String>, IntegrationError> {
        debug!(%id, "Looking up caller");
        let response = self.http.get(&self.url).query(&[("id", id)]).send().await?;

        if !response.status().is_success() {
            return Err(IntegrationError::Status(response.status().as_u16()));
        }

        let body: LookupResponse = response.json().await?;
        Ok(body.name.filter(|name| !name.trim().is_empty()))
    }
}

/// Used when no lookup URL is configured.
pub struct NoDirectory;

#[async_trait]
impl CallerDirectory for NoDirectory {
    async fn display_name(&self, _id: &str) -> Result<Option<String>, IntegrationError> {
        Ok(None)
    }
}
