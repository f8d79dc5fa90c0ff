//! Realtime AI session events.
//!
//! Client events configure the session, stream caller audio, and ask for responses.
//! Of the server events, only the audio deltas drive the bridge; transcripts feed the
//! call outcome and everything else is logged.

use serde::{Deserialize, Serialize};

/// Events sent to the AI leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        /// Base64-encoded PCM16 little-endian audio
        audio: String,
    },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseRequest },
}

/// Session settings sent once, right after the AI socket opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl TurnDetection {
    pub fn server_vad() -> Self {
        Self {
            kind: "server_vad".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRequest {
    pub modalities: Vec<String>,
    pub instructions: String,
}

/// Everything needed to prime a freshly opened AI leg.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub session: SessionConfig,
    /// Prompt for the opening utterance
    pub greeting: String,
}

impl SessionSetup {
    pub fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: self.session.clone(),
        }
    }

    pub fn greeting_request(&self) -> ClientEvent {
        ClientEvent::ResponseCreate {
            response: ResponseRequest {
                modalities: self.session.modalities.clone(),
                instructions: self.greeting.clone(),
            },
        }
    }
}

/// Events received from the AI leg.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Incremental output audio (base64 PCM16)
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: String },

    /// Full text of what the assistant just said
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AgentTranscript { transcript: String },

    /// Transcription of a caller turn
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    CallerTranscript { transcript: String },

    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Just the `type` field, for logging events the bridge doesn't act on.
#[derive(Debug, Deserialize)]
pub struct EventKind {
    #[serde(rename = "type")]
    pub kind: String,
}
