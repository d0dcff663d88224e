//! Engine session lifecycle
//!
//! ```text
//! Disconnected -> Launching -> AwaitingReady -> Connected <-> Driving
//!                     |              |              |           |
//!                     +--------------+---> Closing <+-----------+
//!                                             |
//!                                        Disconnected
//! ```

use crate::error::StateMachineError;
use serde::Serialize;

/// States of an engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No engine process and no link
    Disconnected,
    /// Engine process is being started
    Launching,
    /// Engine is up; waiting for it to accept an attach
    AwaitingReady,
    /// Link established, idle
    Connected,
    /// An operation is in flight on the link
    Driving,
    /// Link and process are being released
    Closing,
}

impl SessionState {
    /// Whether the session holds engine resources in this state
    #[must_use]
    pub fn holds_resources(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

/// Validates a state transition.
pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: SessionState) -> Vec<SessionState> {
    use SessionState::{AwaitingReady, Closing, Connected, Disconnected, Driving, Launching};
    match from {
        Disconnected => vec![Launching],
        Launching => vec![AwaitingReady, Closing],
        AwaitingReady => vec![Connected, Closing],
        Connected => vec![Driving, Closing],
        Driving => vec![Connected, Closing],
        Closing => vec![Disconnected],
    }
}

fn allowed(from: SessionState, to: SessionState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
