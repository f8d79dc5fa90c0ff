//! # Audio Module
//!
//! Everything that touches raw audio on its way between the two legs of a call.
//!
//! ## Key Components:
//! - **Codec**: μ-law ⇄ PCM16 conversion with integer-ratio resampling
//! - **Buffers**: the output byte queue and the caller-audio backlog
//! - **Pacer**: releases queued output to the telephony leg at playback rate
//!
//! ## Audio Formats:
//! - **Telephony leg**: 8kHz, 8-bit μ-law, mono
//! - **AI leg**: 24kHz, 16-bit PCM little-endian, mono

pub mod buffer;
pub mod codec;
pub mod pacer;
