//! Ending the phone call itself, not just the media stream.
//!
//! Closing the media socket leaves the caller listening to silence on some
//! providers. When hang-up on idle is enabled, the bridge also asks the provider's
//! REST API to complete the call.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::IntegrationError;

#[async_trait]
pub trait CallControl: Send + Sync {
    async fn hang_up(&self, call_sid: &str) -> Result<(), IntegrationError>;
}

/// Twilio-style REST call control.
pub struct TwilioCallControl {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioCallControl {
    pub fn new(http: reqwest::Client, api_base: String, account_sid: String, auth_token: String) -> Self {
        Self {
            http,
            api_base,
            account_sid,
            auth_token,
        }
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid,
            call_sid
        )
    }
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn hang_up(&self, call_sid: &str) -> Result<(), IntegrationError> {
        let response = self
            .http
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IntegrationError::Status(response.status().as_u16()));
        }
        info!(%call_sid, "Call completed through call control");
        Ok(())
    }
}

/// Used when no provider credentials are configured.
pub struct LogOnlyCallControl;

#[async_trait]
impl CallControl for LogOnlyCallControl {
    async fn hang_up(&self, call_sid: &str) -> Result<(), IntegrationError> {
        warn!(%call_sid, "Hang-up requested but call control is not configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_url() {
        let control = TwilioCallControl::new(
            reqwest::Client::new(),
            "https://api.twilio.com/".to_string(),
            "AC1".to_string(),
            "secret".to_string(),
        );
        assert_eq!(
            control.call_url("CA9"),
            "https://api.twilio.com/2010-04-01/Accounts/AC1/Calls/CA9.json"
        );
    }

    #[tokio::test]
    async fn test_log_only_hang_up_succeeds() {
        assert!(LogOnlyCallControl.hang_up("CA9").await.is_ok());
    }
}
