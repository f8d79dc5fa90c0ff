//! # Audio Buffer Management
//!
//! Two small queues that sit between the legs of a call:
//! - **OutputQueue**: μ-law bytes produced by the AI leg, waiting to be paced out
//!   to the telephony leg one frame at a time
//! - **SampleBacklog**: caller audio held back while the AI leg is still connecting
//!   (only used when the bridge is configured to buffer instead of drop)
//!
//! ## Ownership:
//! Both buffers are plain fields of a single call's session. Each call runs on
//! one actor, so no locking is involved.

use std::collections::VecDeque;

/// FIFO byte queue feeding the pacer.
///
/// ## Invariants:
/// - Bytes leave in exactly the order they arrived
/// - Appending never drops data; the queue grows if the consumer stalls
#[derive(Debug, Default)]
pub struct OutputQueue {
    bytes: VecDeque<u8>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes at the tail.
    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
    }

    /// Remove exactly `len` bytes from the head, or nothing if fewer are queued.
    pub fn pop_frame(&mut self, len: usize) -> Option<Vec<u8>> {
        if len == 0 || self.bytes.len() < len {
            return None;
        }
        Some(self.bytes.drain(..len).collect())
    }

    /// Number of bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Bounded backlog of 16-bit samples.
///
/// ## Memory Management:
/// Holds at most `max_samples`; when full, the oldest samples are discarded so
/// the backlog always holds the most recent audio.
#[derive(Debug)]
pub struct SampleBacklog {
    samples: VecDeque<i16>,
    max_samples: usize,
}

impl SampleBacklog {
    /// Create a backlog holding up to `duration_ms` of audio at `sample_rate`.
    ///
    /// ## Example:
    /// 2000ms at 24kHz: 2000 * 24000 / 1000 = 48,000 samples
    pub fn new(sample_rate: u32, duration_ms: u32) -> Self {
        let max_samples = (duration_ms as usize * sample_rate as usize) / 1000;
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn push(&mut self, data: &[i16]) {
        for &sample in data {
            self.samples.push_back(sample);
            if self.samples.len() > self.max_samples {
                self.samples.pop_front();
            }
        }
    }

    /// Take everything buffered, leaving the backlog empty.
    pub fn drain_all(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }
}
