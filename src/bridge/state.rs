//! # Bridge Lifecycle
//!
//! The joint lifecycle of both legs of one call, as an explicit state enum with a
//! single transition function.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: telephony socket accepted, AI leg not yet requested
//! 2. **Negotiating**: credential exchange / AI socket connect in flight
//! 3. **Active**: both legs open, audio flowing
//! 4. **Closing**: teardown started by either leg
//! 5. **Closed**: terminal; timers cancelled, both sockets closed
//!
//! A failed negotiation drops back to `Connecting`; the telephony leg stays up.

use thiserror::Error;

/// Current lifecycle state of a bridged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Negotiating,
    Active,
    Closing,
    Closed,
}

/// Events that move a call between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Telephony `start` arrived
    StreamStarted,
    /// AI socket opened
    AiLegOpened,
    /// Credential exchange or AI connect failed
    SetupFailed,
    /// Either leg closed, errored, stopped, or went idle
    TeardownBegan,
    /// Timers cancelled and both legs closed
    TeardownFinished,
}

/// A transition that isn't allowed from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply {transition:?} in state {from:?}")]
pub struct InvalidTransition {
    pub from: BridgeState,
    pub transition: Transition,
}

impl BridgeState {
    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Connecting => "connecting",
            BridgeState::Negotiating => "negotiating",
            BridgeState::Active => "active",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        }
    }

    /// Compute the state after `transition`.
    ///
    /// ## State Transitions:
    /// - Connecting → Negotiating (StreamStarted)
    /// - Negotiating → Active (AiLegOpened)
    /// - Negotiating → Connecting (SetupFailed)
    /// - Connecting/Negotiating/Active → Closing (TeardownBegan)
    /// - Closing → Closed (TeardownFinished)
    pub fn apply(self, transition: Transition) -> Result<BridgeState, InvalidTransition> {
        use BridgeState::*;
        use Transition::*;

        match (self, transition) {
            (Connecting, StreamStarted) => Ok(Negotiating),
            (Negotiating, AiLegOpened) => Ok(Active),
            (Negotiating, SetupFailed) => Ok(Connecting),
            (Connecting | Negotiating | Active, TeardownBegan) => Ok(Closing),
            (Closing, TeardownFinished) => Ok(Closed),
            (from, transition) => Err(InvalidTransition { from, transition }),
        }
    }

    /// True once teardown has started.
    pub fn is_terminating(&self) -> bool {
        matches!(self, BridgeState::Closing | BridgeState::Closed)
    }
}
