//! Telephony media-stream messages.
//!
//! The telephony provider sends one JSON object per WebSocket text frame, tagged by
//! `event`. Audio travels as base64 μ-law in `media.payload`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the mark sent when there is no audio to play.
pub const KEEPALIVE_MARK: &str = "keepalive";

/// Messages received from the telephony leg.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// Handshake sent before `start`
    Connected,

    /// Stream metadata; the first structured message of a call
    Start { start: StreamStart },

    /// One chunk of caller audio
    Media { media: MediaPayload },

    /// Playback acknowledgement for a mark we sent
    Mark { mark: MarkLabel },

    /// The call's media stream has ended
    Stop,

    /// Anything else the provider adds (dtmf, etc.)
    #[serde(other)]
    Other,
}

/// Metadata carried by the `start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,

    #[serde(default)]
    pub call_sid: Option<String>,

    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded μ-law audio
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

/// Messages sent to the telephony leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
}

impl OutboundMessage {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaPayload { payload },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        OutboundMessage::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkLabel {
                name: name.to_string(),
            },
        }
    }
}
