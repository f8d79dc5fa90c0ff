//! # Media Stream WebSocket Handler
//!
//! Accepts the telephony provider's media stream on `/media` and bridges it to a
//! realtime AI session.
//!
//! ## Actor Model:
//! Each telephony connection is one `MediaStreamSession` actor. The actor owns the
//! telephony socket (through its `WebsocketContext`), the sending half of the AI
//! socket, and the pacer/watchdog timers. Everything else about the call lives in
//! the `BridgeSession` it drives.
//!
//! ## AI Leg Tasks:
//! - **negotiation**: caller lookup, credential exchange, socket connect; reports
//!   `AiLegOpened` or `AiLegFailed`
//! - **writer**: drains an unbounded channel into the AI socket
//! - **reader**: forwards each text frame as `AiFrame`, then `AiLegClosed` when the
//!   socket ends for any reason
//!
//! Socket callbacks never touch session state directly; they become actor messages
//! handled one at a time on the actor's arbiter.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::{self, Message as AiMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::pacer::TelephonyOutlet;
use crate::bridge::outcome::CallOutcome;
use crate::bridge::session::{BridgeIo, BridgeSession, BridgeSettings, TimerKind};
use crate::error::LegError;
use crate::integrations::Services;
use crate::protocol::realtime::{ClientEvent, SessionSetup};
use crate::protocol::telephony::{OutboundMessage, StreamStart, TelephonyEvent};
use crate::state::AppState;

/// Sending half of an open AI socket.
struct AiLink {
    tx: mpsc::UnboundedSender<AiMessage>,
}

/// One bridged call.
pub struct MediaStreamSession {
    core: BridgeSession<SpawnHandle>,
    ai: Option<AiLink>,
    telephony_open: bool,
    state: AppState,
}

/// The AI socket is open and its writer/reader tasks are running.
#[derive(Message)]
#[rtype(result = "()")]
struct AiLegOpened {
    tx: mpsc::UnboundedSender<AiMessage>,
    setup: SessionSetup,
}

#[derive(Message)]
#[rtype(result = "()")]
struct AiLegFailed {
    reason: String,
}

/// One text frame from the AI socket.
#[derive(Message)]
#[rtype(result = "()")]
struct AiFrame(String);

#[derive(Message)]
#[rtype(result = "()")]
struct AiLegClosed;

impl MediaStreamSession {
    pub fn new(state: AppState) -> Self {
        let settings = BridgeSettings::from_config(&state.config);
        Self {
            core: BridgeSession::new(settings, state.transcoder, Instant::now()),
            ai: None,
            telephony_open: true,
            state,
        }
    }

    /// Run `f` against the core with an I/O adapter over this actor's sockets and timers.
    fn with_core<R>(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        f: impl FnOnce(&mut BridgeSession<SpawnHandle>, &mut ActorIo<'_>) -> R,
    ) -> R {
        let Self {
            core,
            ai,
            telephony_open,
            state,
        } = self;
        let mut io = ActorIo {
            session_id: core.id(),
            ctx,
            ai,
            telephony_open,
            state,
        };
        f(core, &mut io)
    }

    fn on_timer(&mut self, kind: TimerKind, ctx: &mut ws::WebsocketContext<Self>) {
        match kind {
            TimerKind::Pacer => {
                self.with_core(ctx, |core, io| core.on_pacer_tick(io));
            }
            TimerKind::Watchdog => {
                self.with_core(ctx, |core, io| core.on_watchdog(io, Instant::now()));
            }
        }
    }

    fn telephony_gone(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.telephony_open = false;
        self.with_core(ctx, |core, io| core.handle_telephony_closed(io));
        ctx.stop();
    }
}

/// `BridgeIo` over a live actor: the telephony socket is the actor's context, the
/// AI socket is the writer channel, timers are actix intervals.
struct ActorIo<'a> {
    session_id: Uuid,
    ctx: &'a mut ws::WebsocketContext<MediaStreamSession>,
    ai: &'a mut Option<AiLink>,
    telephony_open: &'a mut bool,
    state: &'a AppState,
}

impl TelephonyOutlet for ActorIo<'_> {
    fn is_open(&self) -> bool {
        *self.telephony_open
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), LegError> {
        if !*self.telephony_open {
            return Err(LegError::Closed);
        }
        self.ctx.text(serde_json::to_string(message)?);
        Ok(())
    }
}

impl BridgeIo for ActorIo<'_> {
    type Timer = SpawnHandle;

    fn close_telephony(&mut self) {
        *self.telephony_open = false;
        self.ctx.close(Some(ws::CloseCode::Normal.into()));
        self.ctx.stop();
    }

    fn ai_is_open(&self) -> bool {
        self.ai.is_some()
    }

    fn send_ai(&mut self, event: &ClientEvent) -> Result<(), LegError> {
        let link = self.ai.as_ref().ok_or(LegError::Closed)?;
        let text = serde_json::to_string(event)?;
        link.tx.send(AiMessage::Text(text)).map_err(|_| LegError::Closed)
    }

    fn close_ai(&mut self) {
        if let Some(link) = self.ai.take() {
            if link.tx.send(AiMessage::Close(None)).is_err() {
                debug!(session_id = %self.session_id, "AI writer already stopped");
            }
        }
    }

    fn start_timer(&mut self, kind: TimerKind, every: Duration) -> SpawnHandle {
        self.ctx.run_interval(every, move |act, ctx| act.on_timer(kind, ctx))
    }

    fn cancel_timer(&mut self, timer: SpawnHandle) {
        self.ctx.cancel_future(timer);
    }

    fn negotiate(&mut self, start: &StreamStart) {
        let addr = self.ctx.address();
        let services = self.state.services.clone();
        let start = start.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            negotiate_ai_leg(addr, services, start, session_id).await;
        });
    }

    fn hang_up(&mut self, call_sid: &str) {
        let call_control = self.state.services.call_control.clone();
        let call_sid = call_sid.to_string();
        let session_id = self.session_id;
        tokio::spawn(async move {
            if let Err(e) = call_control.hang_up(&call_sid).await {
                warn!(%session_id, %call_sid, "Hang-up failed: {}", e);
            }
        });
    }

    fn finish(&mut self, outcome: CallOutcome) {
        self.state.metrics.call_completed();
        info!(
            session_id = %self.session_id,
            outcome = ?outcome.outcome,
            duration_secs = outcome.duration_secs,
            "Call finished"
        );

        let sink = self.state.services.outcomes.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(&outcome).await {
                warn!(session_id = %outcome.session_id, "Failed to record call outcome: {}", e);
            }
        });
    }
}

/// Bring up the AI leg and report the result back to the actor.
async fn negotiate_ai_leg(addr: Addr<MediaStreamSession>, services: Services, start: StreamStart, session_id: Uuid) {
    let caller_name = services.caller_name(&start).await;
    let setup = services.realtime.session_setup(caller_name.as_deref());

    let connected = async {
        let credential = services.realtime.create_credential().await?;
        services.realtime.connect(&credential).await
    }
    .await;

    let socket = match connected {
        Ok(socket) => socket,
        Err(e) => {
            addr.do_send(AiLegFailed { reason: e.to_string() });
            return;
        }
    };

    let (sink, mut source) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = UnboundedReceiverStream::new(rx)
            .map(Ok::<_, tungstenite::Error>)
            .forward(sink)
            .await
        {
            debug!(%session_id, "AI writer stopped: {}", e);
        }
    });

    addr.do_send(AiLegOpened { tx, setup });

    tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(AiMessage::Text(text)) => addr.do_send(AiFrame(text)),
                Ok(AiMessage::Close(frame)) => {
                    debug!(%session_id, ?frame, "AI leg sent close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%session_id, "AI socket error: {}", e);
                    break;
                }
            }
            if !addr.connected() {
                break;
            }
        }
        addr.do_send(AiLegClosed);
    });
}

impl Actor for MediaStreamSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.state.metrics.session_started();
        info!(session_id = %self.core.id(), "Media stream connected");
        self.with_core(ctx, |core, io| core.start_timers(io));
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        if !self.core.state().is_terminating() {
            self.telephony_open = false;
            self.with_core(ctx, |core, io| core.handle_telephony_closed(io));
        }
        self.state.metrics.session_ended();

        let metrics = self.state.metrics.snapshot();
        info!(
            session_id = %self.core.id(),
            active_sessions = metrics.active_sessions,
            sessions_total = metrics.sessions_total,
            setup_failures = metrics.setup_failures,
            completed_calls = metrics.completed_calls,
            "Media stream session stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<TelephonyEvent>(&text) {
                Ok(event) => self.with_core(ctx, |core, io| core.handle_telephony(io, event, Instant::now())),
                Err(e) => warn!(session_id = %self.core.id(), "Unparseable telephony message: {}", e),
            },
            Ok(ws::Message::Binary(data)) => {
                debug!(session_id = %self.core.id(), bytes = data.len(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.core.id(), ?reason, "Telephony leg sent close");
                self.telephony_gone(ctx);
            }
            Err(err) => {
                warn!(session_id = %self.core.id(), "Telephony socket error: {}", err);
                self.telephony_gone(ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.telephony_gone(ctx);
    }
}

impl Handler<AiLegOpened> for MediaStreamSession {
    type Result = ();

    fn handle(&mut self, msg: AiLegOpened, ctx: &mut Self::Context) {
        self.ai = Some(AiLink { tx: msg.tx });
        let accepted = self.with_core(ctx, |core, io| core.handle_ai_opened(io, &msg.setup));

        if let Err(e) = accepted {
            debug!(session_id = %self.core.id(), "Closing unneeded AI leg: {}", e);
            if let Some(link) = self.ai.take() {
                let _ = link.tx.send(AiMessage::Close(None));
            }
        }
    }
}

impl Handler<AiLegFailed> for MediaStreamSession {
    type Result = ();

    fn handle(&mut self, msg: AiLegFailed, ctx: &mut Self::Context) {
        self.state.metrics.setup_failed();
        self.with_core(ctx, |core, io| core.handle_setup_failed(io, &msg.reason));
    }
}

impl Handler<AiFrame> for MediaStreamSession {
    type Result = ();

    fn handle(&mut self, msg: AiFrame, _ctx: &mut Self::Context) {
        self.core.handle_ai_message(&msg.0, Instant::now());
    }
}

impl Handler<AiLegClosed> for MediaStreamSession {
    type Result = ();

    fn handle(&mut self, _msg: AiLegClosed, ctx: &mut Self::Context) {
        self.ai = None;
        self.with_core(ctx, |core, io| core.handle_ai_closed(io));
    }
}

/// WebSocket endpoint for the telephony media stream.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "Media stream upgrade requested");
    ws::start(MediaStreamSession::new(state.get_ref().clone()), &req, stream)
}
