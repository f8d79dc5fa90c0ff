//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables (with APP__ prefix, `__` between levels)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known deployment variables (HOST, PORT, OPENAI_API_KEY, TWILIO_*)
//! 2. Environment variables (APP__SERVER__PORT, APP__BRIDGE__IDLE_TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Why `__` as the separator:
//! Most keys contain underscores themselves (`idle_timeout_secs`), so a single `_`
//! can't tell nesting apart from the key name.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::audio::codec::{CodecError, Transcoder, REALTIME_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE};
use crate::error::{AppError, AppResult};

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub bridge: BridgeConfig,
    pub realtime: RealtimeConfig,
    pub integrations: IntegrationsConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio formats on the two legs.
///
/// ## Constraints:
/// - `realtime_sample_rate` must be a whole multiple of `telephony_sample_rate`
///   (sample-and-hold upsampling / decimation only handle integer ratios)
/// - `frame_ms` sets both the pacer tick and the frame size:
///   8kHz * 20ms = 160 bytes per frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub telephony_sample_rate: u32,
    pub realtime_sample_rate: u32,
    pub frame_ms: u32,
}

/// What to do with caller audio that arrives before the AI leg is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerAudioPolicy {
    /// Discard it
    Drop,
    /// Keep a bounded backlog and send it once the AI leg opens
    Buffer,
}

/// Per-call lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Seconds without inbound traffic on either leg before the call is torn down (0 disables)
    pub idle_timeout_secs: u64,
    /// How often the idle watchdog checks
    pub idle_check_interval_ms: u64,
    /// Also end the phone call through the call-control API on idle timeout
    pub hangup_on_idle: bool,
    pub caller_audio_while_connecting: CallerAudioPolicy,
    /// Upper bound on the backlog kept under the `buffer` policy
    pub max_buffered_caller_audio_ms: u32,
    /// Extra negotiation attempts after a failed AI setup
    pub setup_retries: u32,
}

/// Realtime AI session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// REST base used for the credential exchange
    pub api_base: String,
    /// WebSocket endpoint for the AI leg
    pub ws_url: String,
    pub model: String,
    pub voice: String,
    pub api_key: String,
    /// System prompt; `{caller_name}` is replaced with the looked-up name
    pub instructions: String,
    /// Prompt for the opening utterance; supports `{caller_name}` too
    pub greeting: String,
    /// Input transcription model (empty disables caller transcripts)
    pub transcription_model: String,
    pub request_timeout_secs: u64,
}

/// Peripheral collaborators. Empty strings disable the matching integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    pub caller_lookup_url: String,
    /// Custom stream parameter holding the lookup id
    pub caller_lookup_param: String,
    pub outcome_webhook_url: String,
    pub outcome_log_path: String,
    pub twilio_api_base: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                telephony_sample_rate: TELEPHONY_SAMPLE_RATE,
                realtime_sample_rate: REALTIME_SAMPLE_RATE,
                frame_ms: 20,
            },
            bridge: BridgeConfig {
                idle_timeout_secs: 60,
                idle_check_interval_ms: 1_000,
                hangup_on_idle: false,
                caller_audio_while_connecting: CallerAudioPolicy::Drop,
                max_buffered_caller_audio_ms: 2_000,
                setup_retries: 0,
            },
            realtime: RealtimeConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                ws_url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: "alloy".to_string(),
                api_key: String::new(),
                instructions: "You are a friendly phone assistant speaking with {caller_name}. \
                    Keep answers short and help them schedule an appointment."
                    .to_string(),
                greeting: "Greet {caller_name} warmly and ask how you can help.".to_string(),
                transcription_model: "whisper-1".to_string(),
                request_timeout_secs: 10,
            },
            integrations: IntegrationsConfig {
                caller_lookup_url: String::new(),
                caller_lookup_param: "bookingId".to_string(),
                outcome_webhook_url: String::new(),
                outcome_log_path: String::new(),
                twilio_api_base: "https://api.twilio.com".to_string(),
                twilio_account_sid: String::new(),
                twilio_auth_token: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`: Override server port
    /// - `APP__BRIDGE__CALLER_AUDIO_WHILE_CONNECTING=buffer`: Keep early caller audio
    /// - `OPENAI_API_KEY=sk-...`: Realtime API key
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Variables that don't follow the APP__ convention
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("OPENAI_API_KEY", "realtime.api_key"),
            ("TWILIO_ACCOUNT_SID", "integrations.twilio_account_sid"),
            ("TWILIO_AUTH_TOKEN", "integrations.twilio_auth_token"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Sample rates are non-zero and form an integer ratio
    /// - A paced frame holds at least one byte
    /// - The idle check interval is non-zero when the watchdog is enabled
    /// - An AI model is named
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::ConfigError("Server port cannot be 0".to_string()));
        }

        self.transcoder()?;

        if self.frame_bytes() == 0 {
            return Err(AppError::ConfigError(format!(
                "A {}ms frame at {}Hz holds no audio",
                self.audio.frame_ms, self.audio.telephony_sample_rate
            )));
        }

        if self.bridge.idle_timeout_secs > 0 && self.bridge.idle_check_interval_ms == 0 {
            return Err(AppError::ConfigError(
                "Idle check interval must be greater than 0".to_string(),
            ));
        }

        if self.realtime.model.trim().is_empty() {
            return Err(AppError::ConfigError("Realtime model must be set".to_string()));
        }

        Ok(())
    }

    /// Codec for the configured sample rates.
    pub fn transcoder(&self) -> Result<Transcoder, CodecError> {
        Transcoder::new(self.audio.telephony_sample_rate, self.audio.realtime_sample_rate)
    }

    /// Bytes of μ-law per paced frame.
    pub fn frame_bytes(&self) -> usize {
        (self.audio.telephony_sample_rate as usize * self.audio.frame_ms as usize) / 1000
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.audio.frame_ms as u64)
    }

    /// `None` when the idle watchdog is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.bridge.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
