//! # Output Pacing
//!
//! The telephony leg plays audio at a fixed rate (8000 bytes/sec for 8kHz μ-law) and
//! expects frames to arrive at that rate. The AI leg, on the other hand, delivers
//! audio in bursts. The pacer absorbs the bursts into an `OutputQueue` and releases
//! exactly one frame per tick.
//!
//! ## Tick Rules:
//! 1. Telephony leg closed, or no stream SID yet: do nothing
//! 2. At least one frame queued: send it as a `media` message
//! 3. Otherwise: send a `keepalive` mark so the stream doesn't look stalled
//!
//! Send failures are logged and swallowed. A send racing the socket close is
//! normal during teardown.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

use crate::audio::buffer::OutputQueue;
use crate::error::LegError;
use crate::protocol::telephony::{OutboundMessage, KEEPALIVE_MARK};

/// Write side of the telephony leg, as far as the pacer is concerned.
pub trait TelephonyOutlet {
    fn is_open(&self) -> bool;
    fn send(&mut self, message: &OutboundMessage) -> Result<(), LegError>;
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Leg not ready; nothing was sent
    Deferred,
    /// One audio frame was sent
    Frame,
    /// Queue was short of a frame; a keepalive mark was sent instead
    Keepalive,
}

/// Fixed-cadence frame emitter for one call.
#[derive(Debug)]
pub struct Pacer {
    queue: OutputQueue,
    frame_bytes: usize,
    frames_sent: u64,
    keepalives_sent: u64,
}

impl Pacer {
    /// Create a pacer emitting `frame_bytes` per tick.
    ///
    /// ## Example:
    /// 8kHz μ-law with 20ms frames: 8000 * 20 / 1000 = 160 bytes per tick
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            queue: OutputQueue::new(),
            frame_bytes,
            frames_sent: 0,
            keepalives_sent: 0,
        }
    }

    /// Append encoded audio to the tail of the queue.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        self.queue.append(bytes);
    }

    /// Run one tick against the telephony leg.
    pub fn tick<O: TelephonyOutlet + ?Sized>(&mut self, outlet: &mut O, stream_sid: Option<&str>) -> TickOutcome {
        let stream_sid = match stream_sid {
            Some(sid) if outlet.is_open() => sid,
            _ => return TickOutcome::Deferred,
        };

        let (message, outcome) = match self.queue.pop_frame(self.frame_bytes) {
            Some(frame) => {
                self.frames_sent += 1;
                (OutboundMessage::media(stream_sid, STANDARD.encode(frame)), TickOutcome::Frame)
            }
            None => {
                self.keepalives_sent += 1;
                (OutboundMessage::mark(stream_sid, KEEPALIVE_MARK), TickOutcome::Keepalive)
            }
        };

        if let Err(e) = outlet.send(&message) {
            debug!(stream_sid, "Dropped paced message: {}", e);
        }
        outcome
    }

    /// Bytes waiting to be sent.
    pub fn queued_bytes(&self) -> usize {
        self.queue.queued_bytes()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn keepalives_sent(&self) -> u64 {
        self.keepalives_sent
    }
}
