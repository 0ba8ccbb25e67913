//! Protocol-level error types shared by handlers and clients.

use http::StatusCode;

use crate::failure::Failure;
use crate::state::{OperationState, StateError};

/// The operation itself reached `failed` or `canceled`.
///
/// Never confused with a transport or handler fault: on the wire it travels
/// with the dedicated "operation failed" status and a state header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation {state}: {}", failure.message)]
pub struct UnsuccessfulOperationError {
    pub state: OperationState,
    pub failure: Failure,
}

impl UnsuccessfulOperationError {
    /// Creates the error, checking that `state` is `failed` or `canceled`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Unexpected` for `running` or `succeeded`.
    pub fn new(state: OperationState, failure: Failure) -> Result<Self, StateError> {
        if !state.is_unsuccessful() {
            return Err(StateError::Unexpected {
                state,
                expected: "failed or canceled",
            });
        }
        Ok(Self { state, failure })
    }

    #[must_use]
    pub fn failed(failure: Failure) -> Self {
        Self {
            state: OperationState::Failed,
            failure,
        }
    }

    #[must_use]
    pub fn canceled(failure: Failure) -> Self {
        Self {
            state: OperationState::Canceled,
            failure,
        }
    }
}

/// A handler fault with a caller-visible status code and failure.
///
/// Handlers return this when they want the caller to see a specific status
/// and message; any other handler fault is reported as a generic 500.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler error ({status}): {}", failure.message)]
pub struct HandlerError {
    pub status: StatusCode,
    pub failure: Failure,
}

impl HandlerError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            failure: Failure::new(message),
        }
    }

    #[must_use]
    pub fn with_failure(status: StatusCode, failure: Failure) -> Self {
        Self { status, failure }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, message)
    }

    #[must_use]
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// True for 4xx statuses.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }
}
