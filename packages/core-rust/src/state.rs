//! Operation lifecycle: states, legal transitions, and the `OperationInfo` wire record.
//!
//! State machine: `running -> {succeeded, failed, canceled}`, exactly once.
//! A synchronous start skips `running` and lands directly on a terminal state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of an operation as carried on the wire.
///
/// The serialized form is the lower-case literal (`"running"`, `"succeeded"`,
/// `"failed"`, `"canceled"`), used both in JSON bodies and in the
/// operation-state header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// The operation was started and has not reached a terminal state yet.
    Running,
    /// The operation completed with a result payload.
    Succeeded,
    /// The operation completed with a failure.
    Failed,
    /// The operation was canceled before it could complete.
    Canceled,
}

impl OperationState {
    /// Returns the wire literal for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// `running` is the only non-terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// True for the terminal states that carry a `Failure` instead of a result.
    #[must_use]
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    /// Validates a transition from `self` to `next`.
    ///
    /// Re-observing the same terminal state is allowed (terminal states are
    /// idempotent). Moving away from a terminal state is a protocol violation.
    ///
    /// # Errors
    ///
    /// Returns `StateError::TerminalTransition` when `self` is terminal and
    /// `next` differs from it.
    pub fn transition_to(self, next: Self) -> Result<Self, StateError> {
        if self.is_terminal() && self != next {
            return Err(StateError::TerminalTransition {
                from: self,
                to: next,
            });
        }
        Ok(next)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(StateError::Invalid(other.to_string())),
        }
    }
}

/// Errors raised by the operation state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid operation state: {0:?}")]
    Invalid(String),
    #[error("illegal transition from terminal state {from} to {to}")]
    TerminalTransition {
        from: OperationState,
        to: OperationState,
    },
    #[error("state {state} is not allowed here, expected {expected}")]
    Unexpected {
        state: OperationState,
        expected: &'static str,
    },
}

/// Current identity and state of an asynchronous operation.
///
/// Returned by `GetOperationInfo` and as the body of an asynchronous start
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Handler-assigned operation ID.
    pub id: String,
    /// State at the time the info was produced.
    pub state: OperationState,
}

impl OperationInfo {
    /// Info for a freshly started asynchronous operation.
    #[must_use]
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: OperationState::Running,
        }
    }
}
