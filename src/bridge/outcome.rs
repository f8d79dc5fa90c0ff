//! Call transcript and the outcome record produced when a call ends.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::integrations::scheduling::detect_appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

impl Speaker {
    fn label(&self) -> &'static str {
        match self {
            Speaker::Caller => "Caller",
            Speaker::Agent => "Agent",
        }
    }
}

/// Ordered transcript turns for one call.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<(Speaker, String)>,
}

impl Transcript {
    /// Record a turn. Blank text is ignored.
    pub fn push(&mut self, speaker: Speaker, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.turns.push((speaker, text.to_string()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// One `Speaker: text` line per turn.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|(speaker, text)| format!("{}: {}", speaker.label(), text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Everything the caller said, in order.
    pub fn caller_text(&self) -> String {
        self.turns
            .iter()
            .filter(|(speaker, _)| *speaker == Speaker::Caller)
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Coarse classification of how a call went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The AI leg never came up
    NoAiLeg,
    /// AI leg was up but nobody said anything
    Silent,
    Conversed,
    /// The caller agreed to a time
    AppointmentScheduled,
}

/// Record handed to the outcome sink when a call ends.
#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    pub session_id: String,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub transcript: String,
    pub outcome: OutcomeKind,
    pub end_reason: String,
    pub appointment: Option<DateTime<Utc>>,
}

/// Classify a finished call.
///
/// The appointment is taken from what the caller said, relative to `now`.
pub fn classify(
    transcript: &Transcript,
    ai_leg_opened: bool,
    now: DateTime<Utc>,
) -> (OutcomeKind, Option<DateTime<Utc>>) {
    if !ai_leg_opened {
        return (OutcomeKind::NoAiLeg, None);
    }
    if transcript.is_empty() {
        return (OutcomeKind::Silent, None);
    }
    match detect_appointment(&transcript.caller_text(), now) {
        Some(at) => (OutcomeKind::AppointmentScheduled, Some(at)),
        None => (OutcomeKind::Conversed, None),
    }
}
