//! Connection state machine. Transitions are a pure function of (state, event, deletion
//! pending) returning the next state and the side effects the registry must apply, in order.

use crate::transport::{CredentialUpdate, MessageBatch, TransportEvent};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connecting,
    AwaitingPairing,
    Open,
    ClosedRetrying,
    ClosedTerminal,
    Deleted,
}

impl ConnectionState {
    /// True once the connection is gone; no further transport events are acted upon.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            ConnectionState::ClosedRetrying | ConnectionState::ClosedTerminal | ConnectionState::Deleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingPairing => "awaiting-pairing",
            ConnectionState::Open => "open",
            ConnectionState::ClosedRetrying => "closed-retrying",
            ConnectionState::ClosedTerminal => "closed-terminal",
            ConnectionState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Effect {
    CachePairing(String),
    ClearPairing,
    PersistCredentials(CredentialUpdate),
    Relay(MessageBatch),
    ScheduleReconnect,
    /// Drop the registry entry (only if it still points at this connection).
    Unregister,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub state: ConnectionState,
    pub effects: Vec<Effect>,
}

impl Step {
    fn stay(state: ConnectionState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    fn to(state: ConnectionState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }
}

/// Apply one transport event.
pub fn transition(state: ConnectionState, event: TransportEvent, deletion_pending: bool) -> Step {
    use ConnectionState::*;

    if state.is_closed() {
        return Step::stay(state);
    }

    match event {
        TransportEvent::CredentialsChanged(update) => {
            Step::to(state, vec![Effect::PersistCredentials(update)])
        }
        TransportEvent::QrIssued(qr) => {
            if deletion_pending {
                Step::stay(state)
            } else {
                Step::to(AwaitingPairing, vec![Effect::CachePairing(qr)])
            }
        }
        TransportEvent::ConnectionOpened => Step::to(Open, vec![Effect::ClearPairing]),
        TransportEvent::ConnectionClosed(reason) => {
            if deletion_pending || reason.is_terminal() {
                Step::to(ClosedTerminal, vec![Effect::ClearPairing, Effect::Unregister])
            } else {
                Step::to(
                    ClosedRetrying,
                    vec![Effect::ClearPairing, Effect::ScheduleReconnect],
                )
            }
        }
        TransportEvent::MessagesReceived(batch) => Step::to(state, vec![Effect::Relay(batch)]),
    }
}
