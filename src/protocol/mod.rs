//! # Wire Protocols
//!
//! JSON message types for both legs of a bridged call:
//! - **telephony**: media-stream events (`start`, `media`, `stop`, `mark`)
//! - **realtime**: AI session client and server events

pub mod realtime;
pub mod telephony;
