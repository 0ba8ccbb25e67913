use crate::content::Content;
use crate::error::UnsuccessfulOperationError;
use crate::failure::Failure;
use crate::state::{OperationState, StateError};

/// Terminal outcome of an operation, as pushed to a callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationCompletion {
    /// `succeeded`, carrying the result payload.
    Successful { content: Content },
    /// `failed` or `canceled`, carrying a failure.
    Unsuccessful {
        state: OperationState,
        failure: Failure,
    },
}

impl OperationCompletion {
    #[must_use]
    pub fn succeeded(content: Content) -> Self {
        Self::Successful { content }
    }

    #[must_use]
    pub fn failed(failure: Failure) -> Self {
        Self::Unsuccessful {
            state: OperationState::Failed,
            failure,
        }
    }

    #[must_use]
    pub fn canceled(failure: Failure) -> Self {
        Self::Unsuccessful {
            state: OperationState::Canceled,
            failure,
        }
    }

    /// Builds an unsuccessful completion, checking the state.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Unexpected` unless `state` is `failed` or `canceled`.
    pub fn unsuccessful(state: OperationState, failure: Failure) -> Result<Self, StateError> {
        let err = UnsuccessfulOperationError::new(state, failure)?;
        Ok(err.into())
    }

    /// The terminal state this completion reports.
    #[must_use]
    pub fn state(&self) -> OperationState {
        match self {
            Self::Successful { .. } => OperationState::Succeeded,
            Self::Unsuccessful { state, .. } => *state,
        }
    }

    /// Splits the completion into the result or the operation-level error.
    ///
    /// # Errors
    ///
    /// Returns the `UnsuccessfulOperationError` for a failed or canceled completion.
    pub fn into_result(self) -> Result<Content, UnsuccessfulOperationError> {
        match self {
            Self::Successful { content } => Ok(content),
            Self::Unsuccessful { state, failure } => {
                Err(UnsuccessfulOperationError { state, failure })
            }
        }
    }
}

impl From<UnsuccessfulOperationError> for OperationCompletion {
    fn from(err: UnsuccessfulOperationError) -> Self {
        Self::Unsuccessful {
            state: err.state,
            failure: err.failure,
        }
    }
}
