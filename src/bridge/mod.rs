//! # Call Bridge
//!
//! Per-call logic joining a telephony media stream to a realtime AI session.
//!
//! ## Key Components:
//! - **state**: lifecycle enum and its transition function
//! - **session**: the sans-I/O core driven by the WebSocket actor
//! - **outcome**: transcript and end-of-call record

pub mod outcome;
pub mod session;
pub mod state;
