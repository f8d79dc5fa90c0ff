//! # Bridge Session
//!
//! The per-call core. One `BridgeSession` wires one telephony leg to at most one AI
//! leg, runs the codec in both directions, owns the pacer and the timers, and moves
//! through the lifecycle in `bridge::state`.
//!
//! ## Driving the Session:
//! The session does no I/O of its own. Every side effect goes through the
//! `BridgeIo` trait, which the WebSocket actor implements against real sockets and
//! actix timers, and which tests implement with plain vectors and counters. Time is
//! passed in as an `Instant`, so the idle watchdog can be tested without sleeping.
//!
//! ## Teardown:
//! Every way a call can end (telephony `stop`, either socket closing or erroring,
//! idle timeout) funnels into `teardown`, which runs once and only once:
//! 1. Cancel every owned timer
//! 2. Close the AI leg if it is open
//! 3. Close the telephony leg if it is open
//! 4. Hand the call outcome to the driver

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::audio::buffer::SampleBacklog;
use crate::audio::codec::{le_bytes_to_samples, samples_to_le_bytes, Transcoder};
use crate::audio::pacer::{Pacer, TelephonyOutlet, TickOutcome};
use crate::bridge::outcome::{classify, CallOutcome, Speaker, Transcript};
use crate::bridge::state::{BridgeState, InvalidTransition, Transition};
use crate::config::{AppConfig, CallerAudioPolicy};
use crate::error::LegError;
use crate::protocol::realtime::{ClientEvent, EventKind, ServerEvent, SessionSetup};
use crate::protocol::telephony::{StreamStart, TelephonyEvent, KEEPALIVE_MARK};

/// The two recurring timers a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Pacer,
    Watchdog,
}

/// Side effects available to a session.
///
/// `Timer` is whatever handle the driver uses to cancel a recurring timer.
pub trait BridgeIo: TelephonyOutlet {
    type Timer;

    fn close_telephony(&mut self);
    fn ai_is_open(&self) -> bool;
    fn send_ai(&mut self, event: &ClientEvent) -> Result<(), LegError>;
    fn close_ai(&mut self);

    /// Start a recurring timer. The driver calls back into the session on each firing.
    fn start_timer(&mut self, kind: TimerKind, every: Duration) -> Self::Timer;
    fn cancel_timer(&mut self, timer: Self::Timer);

    /// Begin bringing up the AI leg for this stream. Completion is reported back
    /// through `handle_ai_opened` or `handle_setup_failed`.
    fn negotiate(&mut self, start: &StreamStart);

    /// Ask the telephony provider to end the phone call itself.
    fn hang_up(&mut self, call_sid: &str);

    /// Called exactly once, when the session reaches `Closed`.
    fn finish(&mut self, outcome: CallOutcome);
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    TelephonyStopped,
    TelephonyClosed,
    AiClosed,
    IdleTimeout,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::TelephonyStopped => "telephony_stopped",
            EndReason::TelephonyClosed => "telephony_closed",
            EndReason::AiClosed => "ai_closed",
            EndReason::IdleTimeout => "idle_timeout",
        }
    }
}

/// Per-call policy, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub frame_bytes: usize,
    pub tick: Duration,
    /// `None` disables the idle watchdog
    pub idle_timeout: Option<Duration>,
    pub idle_check: Duration,
    pub hangup_on_idle: bool,
    pub caller_audio: CallerAudioPolicy,
    pub max_buffered_caller_audio_ms: u32,
    pub setup_retries: u32,
}

impl BridgeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            frame_bytes: config.frame_bytes(),
            tick: config.frame_interval(),
            idle_timeout: config.idle_timeout(),
            idle_check: Duration::from_millis(config.bridge.idle_check_interval_ms),
            hangup_on_idle: config.bridge.hangup_on_idle,
            caller_audio: config.bridge.caller_audio_while_connecting,
            max_buffered_caller_audio_ms: config.bridge.max_buffered_caller_audio_ms,
            setup_retries: config.bridge.setup_retries,
        }
    }
}

/// State of one bridged call.
pub struct BridgeSession<T> {
    id: Uuid,
    state: BridgeState,
    settings: BridgeSettings,
    transcoder: Transcoder,
    pacer: Pacer,
    stream: Option<StreamStart>,
    timers: Vec<(TimerKind, T)>,
    backlog: Option<SampleBacklog>,
    transcript: Transcript,
    started_at: DateTime<Utc>,
    last_activity: Instant,
    ai_leg_opened: bool,
    setup_attempts: u32,
    dropped_caller_frames: u64,
}

impl<T> BridgeSession<T> {
    pub fn new(settings: BridgeSettings, transcoder: Transcoder, now: Instant) -> Self {
        let backlog = match settings.caller_audio {
            CallerAudioPolicy::Buffer => Some(SampleBacklog::new(
                transcoder.realtime_rate(),
                settings.max_buffered_caller_audio_ms,
            )),
            CallerAudioPolicy::Drop => None,
        };

        Self {
            id: Uuid::new_v4(),
            state: BridgeState::Connecting,
            pacer: Pacer::new(settings.frame_bytes),
            settings,
            transcoder,
            stream: None,
            timers: Vec::new(),
            backlog,
            transcript: Transcript::default(),
            started_at: Utc::now(),
            last_activity: now,
            ai_leg_opened: false,
            setup_attempts: 0,
            dropped_caller_frames: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.stream_sid.as_str())
    }

    pub fn queued_bytes(&self) -> usize {
        self.pacer.queued_bytes()
    }

    /// Start the pacer tick and, if configured, the idle watchdog.
    pub fn start_timers<I: BridgeIo<Timer = T>>(&mut self, io: &mut I) {
        if !self.timers.is_empty() || self.state.is_terminating() {
            return;
        }

        let tick = io.start_timer(TimerKind::Pacer, self.settings.tick);
        self.timers.push((TimerKind::Pacer, tick));

        if self.settings.idle_timeout.is_some() {
            let watchdog = io.start_timer(TimerKind::Watchdog, self.settings.idle_check);
            self.timers.push((TimerKind::Watchdog, watchdog));
        }
    }

    /// Handle one message from the telephony leg.
    pub fn handle_telephony<I: BridgeIo<Timer = T>>(&mut self, io: &mut I, event: TelephonyEvent, now: Instant) {
        if self.state.is_terminating() {
            return;
        }
        // Echoes of our own keepalives say nothing about the caller
        let echo = matches!(&event, TelephonyEvent::Mark { mark } if mark.name == KEEPALIVE_MARK);
        if !echo {
            self.last_activity = now;
        }

        match event {
            TelephonyEvent::Start { start } => self.on_stream_start(io, start),
            TelephonyEvent::Media { media } => self.on_caller_audio(io, &media.payload),
            TelephonyEvent::Stop => {
                info!(session_id = %self.id, "Telephony stream stopped");
                self.teardown(io, EndReason::TelephonyStopped);
            }
            TelephonyEvent::Connected => debug!(session_id = %self.id, "Telephony stream connected"),
            TelephonyEvent::Mark { mark } => trace!(session_id = %self.id, mark = %mark.name, "Mark played"),
            TelephonyEvent::Other => trace!(session_id = %self.id, "Ignoring telephony event"),
        }
    }

    fn on_stream_start<I: BridgeIo<Timer = T>>(&mut self, io: &mut I, start: StreamStart) {
        if self.transition(Transition::StreamStarted).is_err() {
            return;
        }

        info!(
            session_id = %self.id,
            stream_sid = %start.stream_sid,
            call_sid = start.call_sid.as_deref().unwrap_or("-"),
            "Telephony stream started"
        );

        self.setup_attempts = 1;
        let start = self.stream.insert(start);
        io.negotiate(start);
    }

    fn on_caller_audio<I: BridgeIo<Timer = T>>(&mut self, io: &mut I, payload: &str) {
        let bytes = match STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session_id = %self.id, "Dropping caller frame with invalid base64: {}", e);
                return;
            }
        };
        let samples = self.transcoder.decode_companded_to_linear(&bytes);

        if self.state == BridgeState::Active && io.ai_is_open() {
            self.send_caller_audio(io, &samples);
            return;
        }

        match self.backlog.as_mut() {
            Some(backlog) => backlog.push(&samples),
            None => self.dropped_caller_frames += 1,
        }
    }

    fn send_caller_audio<I: BridgeIo<Timer = T>>(&self, io: &mut I, samples: &[i16]) {
        let event = ClientEvent::InputAudioAppend {
            audio: STANDARD.encode(samples_to_le_bytes(samples)),
        };
        self.send_ai_event(io, &event);
    }

    fn send_ai_event<I: BridgeIo<Timer = T>>(&self, io: &mut I, event: &ClientEvent) {
        if let Err(e) = io.send_ai(event) {
            debug!(session_id = %self.id, "Dropped AI-bound message: {}", e);
        }
    }

    /// The AI socket is open: configure it, flush any held caller audio, and ask
    /// for the greeting.
    ///
    /// Fails if the call is no longer negotiating; the caller should close the new leg.
    pub fn handle_ai_opened<I: BridgeIo<Timer = T>>(
        &mut self,
        io: &mut I,
        setup: &SessionSetup,
    ) -> Result<(), InvalidTransition> {
        self.transition(Transition::AiLegOpened)?;
        self.ai_leg_opened = true;
        info!(session_id = %self.id, attempt = self.setup_attempts, "AI leg open");

        self.send_ai_event(io, &setup.session_update());

        let held = self.backlog.as_mut().map(SampleBacklog::drain_all).unwrap_or_default();
        if !held.is_empty() {
            debug!(session_id = %self.id, samples = held.len(), "Flushing held caller audio");
            self.send_caller_audio(io, &held);
        }

        self.send_ai_event(io, &setup.greeting_request());
        Ok(())
    }

    /// Credential exchange or AI connect failed. The telephony leg stays up; if
    /// retries remain, negotiation starts again.
    pub fn handle_setup_failed<I: BridgeIo<Timer = T>>(&mut self, io: &mut I, reason: &str) {
        if self.transition(Transition::SetupFailed).is_err() {
            return;
        }
        warn!(session_id = %self.id, attempt = self.setup_attempts, "AI setup failed: {}", reason);

        if self.setup_attempts > self.settings.setup_retries {
            return;
        }
        if self.transition(Transition::StreamStarted).is_err() {
            return;
        }
        self.setup_attempts += 1;
        if let Some(start) = self.stream.as_ref() {
            info!(session_id = %self.id, attempt = self.setup_attempts, "Retrying AI setup");
            io.negotiate(start);
        }
    }

    /// Parse and handle one text frame from the AI leg.
    pub fn handle_ai_message(&mut self, text: &str, now: Instant) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent::Other) => {
                if let Ok(kind) = serde_json::from_str::<EventKind>(text) {
                    trace!(session_id = %self.id, event = %kind.kind, "AI event");
                }
                self.handle_ai_event(ServerEvent::Other, now);
            }
            Ok(event) => self.handle_ai_event(event, now),
            Err(e) => warn!(session_id = %self.id, "Unparseable AI message: {}", e),
        }
    }

    /// Handle one event from the AI leg.
    pub fn handle_ai_event(&mut self, event: ServerEvent, now: Instant) {
        if self.state.is_terminating() {
            return;
        }
        self.last_activity = now;

        match event {
            ServerEvent::AudioDelta { delta } => match STANDARD.decode(&delta) {
                Ok(bytes) => {
                    let samples = le_bytes_to_samples(&bytes);
                    let encoded = self.transcoder.encode_linear_to_companded(&samples);
                    self.pacer.enqueue(&encoded);
                }
                Err(e) => warn!(session_id = %self.id, "Dropping AI audio with invalid base64: {}", e),
            },
            ServerEvent::AgentTranscript { transcript } => {
                debug!(session_id = %self.id, "Agent: {}", transcript);
                self.transcript.push(Speaker::Agent, &transcript);
            }
            ServerEvent::CallerTranscript { transcript } => {
                debug!(session_id = %self.id, "Caller: {}", transcript);
                self.transcript.push(Speaker::Caller, &transcript);
            }
            ServerEvent::Error { error } => warn!(
                session_id = %self.id,
                kind = error.kind.as_deref().unwrap_or("-"),
                code = error.code.as_deref().unwrap_or("-"),
                "AI leg reported an error: {}",
                error.message
            ),
            ServerEvent::Other => {}
        }
    }

    /// The AI socket closed or errored.
    pub fn handle_ai_closed<I: BridgeIo<Timer = T>>(&mut self, io: &mut I) {
        if !self.state.is_terminating() {
            info!(session_id = %self.id, "AI leg closed");
        }
        self.teardown(io, EndReason::AiClosed);
    }

    /// The telephony socket closed or errored.
    pub fn handle_telephony_closed<I: BridgeIo<Timer = T>>(&mut self, io: &mut I) {
        if !self.state.is_terminating() {
            info!(session_id = %self.id, "Telephony leg closed");
        }
        self.teardown(io, EndReason::TelephonyClosed);
    }

    /// Pacer timer fired.
    pub fn on_pacer_tick<I: BridgeIo<Timer = T>>(&mut self, io: &mut I) -> TickOutcome {
        if self.state.is_terminating() {
            return TickOutcome::Deferred;
        }
        let stream_sid = self.stream.as_ref().map(|s| s.stream_sid.as_str());
        self.pacer.tick(io, stream_sid)
    }

    /// Watchdog timer fired. Returns true if the call was torn down for being idle.
    pub fn on_watchdog<I: BridgeIo<Timer = T>>(&mut self, io: &mut I, now: Instant) -> bool {
        let Some(limit) = self.settings.idle_timeout else {
            return false;
        };
        if self.state.is_terminating() {
            return false;
        }

        let idle = now.saturating_duration_since(self.last_activity);
        if idle <= limit {
            return false;
        }

        warn!(session_id = %self.id, idle_secs = idle.as_secs(), "Call idle, tearing down");
        if self.settings.hangup_on_idle {
            if let Some(call_sid) = self.stream.as_ref().and_then(|s| s.call_sid.as_deref()) {
                io.hang_up(call_sid);
            }
        }
        self.teardown(io, EndReason::IdleTimeout);
        true
    }

    /// End the call. Safe to call any number of times; only the first does anything.
    pub fn teardown<I: BridgeIo<Timer = T>>(&mut self, io: &mut I, reason: EndReason) {
        if self.state.is_terminating() {
            return;
        }
        if self.transition(Transition::TeardownBegan).is_err() {
            return;
        }

        let id = self.id;
        for (kind, timer) in self.timers.drain(..) {
            trace!(session_id = %id, ?kind, "Cancelling timer");
            io.cancel_timer(timer);
        }

        if io.ai_is_open() {
            io.close_ai();
        }
        if io.is_open() {
            io.close_telephony();
        }

        let _ = self.transition(Transition::TeardownFinished);

        info!(
            session_id = %self.id,
            stream_sid = self.stream_sid().unwrap_or("-"),
            reason = reason.as_str(),
            frames_sent = self.pacer.frames_sent(),
            keepalives_sent = self.pacer.keepalives_sent(),
            unplayed_bytes = self.queued_bytes(),
            dropped_caller_frames = self.dropped_caller_frames,
            "Call bridge closed"
        );

        io.finish(self.outcome(reason));
    }

    fn outcome(&self, reason: EndReason) -> CallOutcome {
        let ended_at = Utc::now();
        let (outcome, appointment) = classify(&self.transcript, self.ai_leg_opened, ended_at);

        CallOutcome {
            session_id: self.id.to_string(),
            stream_sid: self.stream.as_ref().map(|s| s.stream_sid.clone()),
            call_sid: self.stream.as_ref().and_then(|s| s.call_sid.clone()),
            started_at: self.started_at,
            duration_secs: (ended_at - self.started_at).num_milliseconds() as f64 / 1000.0,
            transcript: self.transcript.render(),
            outcome,
            end_reason: reason.as_str().to_string(),
            appointment,
        }
    }

    fn transition(&mut self, transition: Transition) -> Result<(), InvalidTransition> {
        match self.state.apply(transition) {
            Ok(next) => {
                debug!(
                    session_id = %self.id,
                    from = self.state.as_str(),
                    to = next.as_str(),
                    "State transition"
                );
                self.state = next;
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.id, "Rejected transition: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::outcome::OutcomeKind;
    use crate::protocol::realtime::{SessionConfig, TurnDetection};
    use crate::protocol::telephony::{MarkLabel, MediaPayload, OutboundMessage};
    use std::collections::HashMap;

    struct FakeIo {
        telephony_open: bool,
        ai_open: bool,
        telephony_sent: Vec<OutboundMessage>,
        ai_sent: Vec<ClientEvent>,
        telephony_closes: u32,
        ai_closes: u32,
        next_timer: u32,
        live_timers: Vec<(u32, TimerKind)>,
        cancelled: Vec<u32>,
        negotiations: u32,
        hangups: Vec<String>,
        outcomes: Vec<CallOutcome>,
    }

    impl FakeIo {
        fn new() -> Self {
            Self {
                telephony_open: true,
                ai_open: false,
                telephony_sent: Vec::new(),
                ai_sent: Vec::new(),
                telephony_closes: 0,
                ai_closes: 0,
                next_timer: 0,
                live_timers: Vec::new(),
                cancelled: Vec::new(),
                negotiations: 0,
                hangups: Vec::new(),
                outcomes: Vec::new(),
            }
        }
    }

    impl TelephonyOutlet for FakeIo {
        fn is_open(&self) -> bool {
            self.telephony_open
        }

        fn send(&mut self, message: &OutboundMessage) -> Result<(), LegError> {
            if !self.telephony_open {
                return Err(LegError::Closed);
            }
            self.telephony_sent.push(message.clone());
            Ok(())
        }
    }

    impl BridgeIo for FakeIo {
        type Timer = u32;

        fn close_telephony(&mut self) {
            self.telephony_open = false;
            self.telephony_closes += 1;
        }

        fn ai_is_open(&self) -> bool {
            self.ai_open
        }

        fn send_ai(&mut self, event: &ClientEvent) -> Result<(), LegError> {
            if !self.ai_open {
                return Err(LegError::Closed);
            }
            self.ai_sent.push(event.clone());
            Ok(())
        }

        fn close_ai(&mut self) {
            self.ai_open = false;
            self.ai_closes += 1;
        }

        fn start_timer(&mut self, kind: TimerKind, _every: Duration) -> u32 {
            self.next_timer += 1;
            self.live_timers.push((self.next_timer, kind));
            self.next_timer
        }

        fn cancel_timer(&mut self, timer: u32) {
            self.live_timers.retain(|(id, _)| *id != timer);
            self.cancelled.push(timer);
        }

        fn negotiate(&mut self, _start: &StreamStart) {
            self.negotiations += 1;
        }

        fn hang_up(&mut self, call_sid: &str) {
            self.hangups.push(call_sid.to_string());
        }

        fn finish(&mut self, outcome: CallOutcome) {
            self.outcomes.push(outcome);
        }
    }

    /// Fire every live timer once, as the driver would when the clock reaches `now`.
    fn fire_timers(session: &mut BridgeSession<u32>, io: &mut FakeIo, now: Instant) {
        let kinds: Vec<TimerKind> = io.live_timers.iter().map(|(_, kind)| *kind).collect();
        for kind in kinds {
            match kind {
                TimerKind::Pacer => {
                    session.on_pacer_tick(io);
                }
                TimerKind::Watchdog => {
                    session.on_watchdog(io, now);
                }
            }
        }
    }

    fn settings() -> BridgeSettings {
        BridgeSettings::from_config(&AppConfig::default())
    }

    fn new_session(settings: BridgeSettings, t0: Instant) -> BridgeSession<u32> {
        BridgeSession::new(settings, Transcoder::default(), t0)
    }

    fn start_event() -> TelephonyEvent {
        TelephonyEvent::Start {
            start: StreamStart {
                stream_sid: "MZ1".to_string(),
                call_sid: Some("CA1".to_string()),
                custom_parameters: HashMap::new(),
            },
        }
    }

    fn media_event(bytes: &[u8]) -> TelephonyEvent {
        TelephonyEvent::Media {
            media: MediaPayload {
                payload: STANDARD.encode(bytes),
            },
        }
    }

    fn setup() -> SessionSetup {
        SessionSetup {
            session: SessionConfig {
                modalities: vec!["audio".into(), "text".into()],
                instructions: "Be brief.".into(),
                voice: "alloy".into(),
                input_audio_format: "pcm16".into(),
                output_audio_format: "pcm16".into(),
                input_audio_transcription: None,
                turn_detection: TurnDetection::server_vad(),
            },
            greeting: "Say hello.".into(),
        }
    }

    /// Bring a session up to `Active` with the AI leg open.
    fn active_session(io: &mut FakeIo, t0: Instant) -> BridgeSession<u32> {
        let mut session = new_session(settings(), t0);
        session.start_timers(io);
        session.handle_telephony(io, start_event(), t0);
        io.ai_open = true;
        session.handle_ai_opened(io, &setup()).unwrap();
        session
    }

    #[test]
    fn test_media_round_trip_through_both_legs() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = active_session(&mut io, t0);

        assert_eq!(session.state(), BridgeState::Active);
        assert_eq!(io.negotiations, 1);
        assert!(matches!(io.ai_sent[0], ClientEvent::SessionUpdate { .. }));
        assert!(matches!(io.ai_sent[1], ClientEvent::ResponseCreate { .. }));

        // 100 bytes of μ-law silence -> 300 zero samples -> 600 zero bytes
        session.handle_telephony(&mut io, media_event(&[0xFF; 100]), t0);
        assert_eq!(io.ai_sent.len(), 3);
        assert_eq!(
            io.ai_sent[2],
            ClientEvent::InputAudioAppend {
                audio: STANDARD.encode(vec![0u8; 600]),
            }
        );

        // 480 samples at 24kHz -> 160 μ-law bytes
        let delta = STANDARD.encode(samples_to_le_bytes(&[1000i16; 480]));
        let message = serde_json::json!({ "type": "response.audio.delta", "delta": delta }).to_string();
        session.handle_ai_message(&message, t0);
        assert_eq!(session.queued_bytes(), 160);

        assert_eq!(session.on_pacer_tick(&mut io), TickOutcome::Frame);
        assert_eq!(io.telephony_sent.len(), 1);
        match &io.telephony_sent[0] {
            OutboundMessage::Media { stream_sid, media } => {
                assert_eq!(stream_sid, "MZ1");
                assert_eq!(STANDARD.decode(&media.payload).unwrap().len(), 160);
            }
            other => panic!("Wrong message: {:?}", other),
        }
        assert_eq!(session.queued_bytes(), 0);
    }

    #[test]
    fn test_ai_close_tears_down_telephony_once() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = active_session(&mut io, t0);
        assert_eq!(io.live_timers.len(), 2);

        io.ai_open = false;
        session.handle_ai_closed(&mut io);

        assert_eq!(session.state(), BridgeState::Closed);
        assert_eq!(io.telephony_closes, 1);
        assert_eq!(io.ai_closes, 0);
        assert!(io.live_timers.is_empty());
        assert_eq!(io.cancelled, vec![1, 2]);
        assert_eq!(io.outcomes.len(), 1);
        assert_eq!(io.outcomes[0].end_reason, "ai_closed");

        // nothing fires or sends after teardown
        io.telephony_sent.clear();
        for secs in 1..=120 {
            fire_timers(&mut session, &mut io, t0 + Duration::from_secs(secs));
        }
        assert_eq!(session.on_pacer_tick(&mut io), TickOutcome::Deferred);
        assert!(io.telephony_sent.is_empty());

        // late close events are no-ops
        session.handle_telephony_closed(&mut io);
        session.teardown(&mut io, EndReason::IdleTimeout);
        assert_eq!(io.telephony_closes, 1);
        assert_eq!(io.cancelled.len(), 2);
        assert_eq!(io.outcomes.len(), 1);
    }

    #[test]
    fn test_telephony_close_tears_down_ai_once() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = active_session(&mut io, t0);

        io.telephony_open = false;
        session.handle_telephony_closed(&mut io);
        session.handle_ai_closed(&mut io);

        assert_eq!(io.ai_closes, 1);
        assert_eq!(io.telephony_closes, 0);
        assert!(io.live_timers.is_empty());
        assert_eq!(io.outcomes.len(), 1);
        assert_eq!(io.outcomes[0].end_reason, "telephony_closed");
    }

    #[test]
    fn test_stop_closes_both_legs() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = active_session(&mut io, t0);

        session.handle_telephony(&mut io, TelephonyEvent::Stop, t0);

        assert_eq!(io.ai_closes, 1);
        assert_eq!(io.telephony_closes, 1);
        assert_eq!(io.outcomes[0].outcome, OutcomeKind::Silent);
        assert_eq!(io.outcomes[0].stream_sid.as_deref(), Some("MZ1"));
        assert_eq!(io.outcomes[0].call_sid.as_deref(), Some("CA1"));
    }

    #[test]
    fn test_pacer_defers_until_stream_start() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);
        session.start_timers(&mut io);

        assert_eq!(session.on_pacer_tick(&mut io), TickOutcome::Deferred);
        session.handle_telephony(&mut io, start_event(), t0);
        assert_eq!(session.on_pacer_tick(&mut io), TickOutcome::Keepalive);
    }

    #[test]
    fn test_caller_audio_dropped_while_connecting() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);

        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_telephony(&mut io, media_event(&[0xFF; 100]), t0);
        io.ai_open = true;
        session.handle_ai_opened(&mut io, &setup()).unwrap();

        assert_eq!(io.ai_sent.len(), 2);
        assert!(matches!(io.ai_sent[1], ClientEvent::ResponseCreate { .. }));
    }

    #[test]
    fn test_caller_audio_buffered_while_connecting() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut settings = settings();
        settings.caller_audio = CallerAudioPolicy::Buffer;
        let mut session = new_session(settings, t0);

        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_telephony(&mut io, media_event(&[0xFF; 100]), t0);
        assert!(io.ai_sent.is_empty());

        io.ai_open = true;
        session.handle_ai_opened(&mut io, &setup()).unwrap();

        assert_eq!(io.ai_sent.len(), 3);
        assert!(matches!(io.ai_sent[0], ClientEvent::SessionUpdate { .. }));
        assert_eq!(
            io.ai_sent[1],
            ClientEvent::InputAudioAppend {
                audio: STANDARD.encode(vec![0u8; 600]),
            }
        );
        assert!(matches!(io.ai_sent[2], ClientEvent::ResponseCreate { .. }));
    }

    #[test]
    fn test_setup_failure_keeps_telephony_leg() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);

        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_setup_failed(&mut io, "401 from credential endpoint");

        assert_eq!(session.state(), BridgeState::Connecting);
        assert_eq!(io.negotiations, 1);
        assert_eq!(io.telephony_closes, 0);
        assert!(io.outcomes.is_empty());

        session.handle_telephony(&mut io, TelephonyEvent::Stop, t0);
        assert_eq!(io.outcomes[0].outcome, OutcomeKind::NoAiLeg);
    }

    #[test]
    fn test_setup_retries_until_exhausted() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut settings = settings();
        settings.setup_retries = 1;
        let mut session = new_session(settings, t0);

        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_setup_failed(&mut io, "connect refused");
        assert_eq!(session.state(), BridgeState::Negotiating);
        assert_eq!(io.negotiations, 2);

        session.handle_setup_failed(&mut io, "connect refused");
        assert_eq!(session.state(), BridgeState::Connecting);
        assert_eq!(io.negotiations, 2);
    }

    #[test]
    fn test_idle_watchdog() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut settings = settings();
        settings.hangup_on_idle = true;
        let mut session = new_session(settings, t0);
        session.start_timers(&mut io);
        session.handle_telephony(&mut io, start_event(), t0);

        assert!(!session.on_watchdog(&mut io, t0 + Duration::from_secs(30)));
        session.handle_telephony(&mut io, TelephonyEvent::Connected, t0 + Duration::from_secs(30));
        assert!(!session.on_watchdog(&mut io, t0 + Duration::from_secs(80)));
        assert!(session.on_watchdog(&mut io, t0 + Duration::from_secs(91)));

        assert_eq!(session.state(), BridgeState::Closed);
        assert_eq!(io.hangups, vec!["CA1".to_string()]);
        assert_eq!(io.telephony_closes, 1);
        assert_eq!(io.outcomes[0].end_reason, "idle_timeout");
        assert!(io.live_timers.is_empty());
    }

    #[test]
    fn test_keepalive_echoes_do_not_count_as_activity() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);
        session.start_timers(&mut io);
        session.handle_telephony(&mut io, start_event(), t0);

        let mark = |name: &str| TelephonyEvent::Mark {
            mark: MarkLabel { name: name.to_string() },
        };

        // The provider acknowledges every keepalive we send on a silent call
        for secs in (5..=60).step_by(5) {
            fire_timers(&mut session, &mut io, t0 + Duration::from_secs(secs));
            session.handle_telephony(&mut io, mark(KEEPALIVE_MARK), t0 + Duration::from_secs(secs));
        }
        assert!(session.on_watchdog(&mut io, t0 + Duration::from_secs(61)));
        assert_eq!(io.outcomes[0].end_reason, "idle_timeout");
        assert!(io.hangups.is_empty());

        // Any other mark is real playback progress
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);
        session.start_timers(&mut io);
        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_telephony(&mut io, mark("greeting-done"), t0 + Duration::from_secs(40));
        assert!(!session.on_watchdog(&mut io, t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_watchdog_disabled() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut settings = settings();
        settings.idle_timeout = None;
        let mut session = new_session(settings, t0);
        session.start_timers(&mut io);

        assert_eq!(io.live_timers, vec![(1, TimerKind::Pacer)]);
        assert!(!session.on_watchdog(&mut io, t0 + Duration::from_secs(3600)));
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);

        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_telephony(
            &mut io,
            TelephonyEvent::Start {
                start: StreamStart {
                    stream_sid: "MZ2".to_string(),
                    call_sid: None,
                    custom_parameters: HashMap::new(),
                },
            },
            t0,
        );

        assert_eq!(io.negotiations, 1);
        assert_eq!(session.stream_sid(), Some("MZ1"));
        assert_eq!(session.state(), BridgeState::Negotiating);
    }

    #[test]
    fn test_ai_opened_after_teardown_is_rejected() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = new_session(settings(), t0);

        session.handle_telephony(&mut io, start_event(), t0);
        session.handle_telephony(&mut io, TelephonyEvent::Stop, t0);

        io.ai_open = true;
        assert!(session.handle_ai_opened(&mut io, &setup()).is_err());
        assert!(io.ai_sent.is_empty());
    }

    #[test]
    fn test_transcripts_feed_outcome() {
        let t0 = Instant::now();
        let mut io = FakeIo::new();
        let mut session = active_session(&mut io, t0);

        session.handle_ai_message(
            r#"{"type":"response.audio_transcript.done","transcript":"Hi, when suits you?"}"#,
            t0,
        );
        session.handle_ai_message(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"Let me think."}"#,
            t0,
        );
        session.handle_ai_message(r#"{"type":"rate_limits.updated","rate_limits":[]}"#, t0);
        session.handle_ai_message("not json", t0);
        session.handle_telephony(&mut io, TelephonyEvent::Stop, t0);

        let outcome = &io.outcomes[0];
        assert_eq!(outcome.outcome, OutcomeKind::Conversed);
        assert_eq!(outcome.transcript, "Agent: Hi, when suits you?\nCaller: Let me think.");
    }
}
