//! API-key request lifecycle
//!
//! The request state machine as a closed set of states plus a transition
//! table. `transition` is a pure function from `(state, event)` to
//! `(next state, effect)`; storage and concurrency live in the trust plane.
//!
//! ```text
//!              approve              generate_key
//! Submitted ───────────► Approved ─────────────► KeyGenerated ──┐
//!     │                                             │   ▲       │ generate_key
//!     │ reject                                      │   └───────┘ (reuse key)
//!     ▼                                     revoke  ▼
//! Rejected ──────────────── revoke ───────────► Revoked ◄─┐
//!                                                  └──────┘ revoke (no-op)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of an API-key request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Submitted,
    Approved,
    Rejected,
    KeyGenerated,
    Revoked,
}

impl RequestState {
    /// Whether a request in this state still blocks a new request for the
    /// same partner/policy pair
    pub fn is_open(&self) -> bool {
        matches!(self, RequestState::Submitted | RequestState::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Submitted => "Submitted",
            RequestState::Approved => "Approved",
            RequestState::Rejected => "Rejected",
            RequestState::KeyGenerated => "KeyGenerated",
            RequestState::Revoked => "Revoked",
        };
        f.write_str(name)
    }
}

/// Event applied to an existing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RequestEvent {
    Approve,
    Reject { reason: String },
    GenerateKey,
    Revoke,
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::Approve => "approve",
            RequestEvent::Reject { .. } => "reject",
            RequestEvent::GenerateKey => "generate_key",
            RequestEvent::Revoke => "revoke",
        }
    }
}

impl fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side effect the store must carry out for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Generate fresh key material
    IssueKey,
    /// Return the already generated key reference
    ReuseExistingKey,
    /// Tell downstream consumers the key may no longer be used
    InvalidateKey,
}

/// Result of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: RequestState,
    pub effect: Effect,
}

/// An event that is not allowed from the given state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RequestState,
    pub event: RequestEvent,
}

/// Apply `event` to `state`
pub fn transition(state: RequestState, event: &RequestEvent) -> Result<Transition, InvalidTransition> {
    use RequestEvent as E;
    use RequestState as S;

    let (next, effect) = match (state, event) {
        (S::Submitted, E::Approve) => (S::Approved, Effect::None),
        (S::Submitted, E::Reject { .. }) => (S::Rejected, Effect::None),
        (S::Approved, E::GenerateKey) => (S::KeyGenerated, Effect::IssueKey),
        (S::KeyGenerated, E::GenerateKey) => (S::KeyGenerated, Effect::ReuseExistingKey),
        (S::Rejected, E::Revoke) => (S::Revoked, Effect::None),
        (S::KeyGenerated, E::Revoke) => (S::Revoked, Effect::InvalidateKey),
        (S::Revoked, E::Revoke) => (S::Revoked, Effect::None),
        _ => {
            return Err(InvalidTransition {
                from: state,
                event: event.clone(),
            })
        }
    };

    Ok(Transition { next, effect })
}
