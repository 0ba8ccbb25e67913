//! Types flowing between the dispatcher and handler implementations.

use std::collections::BTreeMap;
use std::time::Duration;

use nexus_core::{Content, HandlerError, OperationState, UnsuccessfulOperationError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Request-scoped context passed to every handler call.
///
/// Carries the caller's non-content headers, an optional deadline (set for
/// long-poll result requests), and a cancellation token that fires when the
/// request is abandoned or finished. Handlers that block must return once
/// [`HandlerContext::done`] resolves.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Lower-cased request headers, excluding `content-*`.
    pub header: BTreeMap<String, String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl HandlerContext {
    #[must_use]
    pub fn new(header: BTreeMap<String, String>) -> Self {
        Self {
            header,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the instant after which the handler should stop waiting.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Token cancelled when the request ends, including client disconnects.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the request was cancelled or its deadline has passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the request is cancelled or its deadline elapses.
    /// Without a deadline, resolves only on cancellation.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options accompanying a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOperationOptions {
    /// Caller-supplied or generated idempotency token.
    pub request_id: String,
    /// Where to push the terminal result, if the caller wants a callback.
    pub callback_url: Option<String>,
}

/// Options accompanying a get-result request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOperationResultOptions {
    /// How long the handler may block, already clamped to the server ceiling.
    /// Zero means "report the current state without waiting".
    pub wait: Duration,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of starting an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOperationResult<T = Content> {
    /// The operation completed during the start call.
    Sync(T),
    /// The operation continues in the background under this ID.
    Async { operation_id: String },
}

impl<T> StartOperationResult<T> {
    /// Converts a synchronous value, leaving the async marker untouched.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<StartOperationResult<U>, E> {
        Ok(match self {
            Self::Sync(value) => StartOperationResult::Sync(f(value)?),
            Self::Async { operation_id } => StartOperationResult::Async { operation_id },
        })
    }
}

/// Outcome of a get-result call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult<T = Content> {
    /// The operation succeeded with this value.
    Ready(T),
    /// The operation is still running after the allowed wait.
    StillRunning,
}

impl<T> OperationResult<T> {
    /// Converts a ready value, leaving `StillRunning` untouched.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<OperationResult<U>, E> {
        Ok(match self {
            Self::Ready(value) => OperationResult::Ready(f(value)?),
            Self::StillRunning => OperationResult::StillRunning,
        })
    }
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Errors returned by handler implementations.
///
/// The dispatcher maps each variant to a distinct wire response:
/// operation-level outcomes become `424` with a state header, handler errors
/// keep their status, and anything else is a generic `500`.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The operation ended `failed`/`canceled` with an explicit failure.
    #[error(transparent)]
    Unsuccessful(#[from] UnsuccessfulOperationError),
    /// The operation ended `failed`/`canceled` because of an application
    /// error; rendered through the configured failure converter.
    #[error("operation {state}: {source}")]
    Application {
        state: OperationState,
        #[source]
        source: anyhow::Error,
    },
    /// A caller-visible handler fault with an explicit status.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// Any other fault; logged, never echoed to the caller.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// The operation failed because of `err`.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::Application {
            state: OperationState::Failed,
            source: err.into(),
        }
    }

    /// The operation was canceled because of `err`.
    pub fn canceled(err: impl Into<anyhow::Error>) -> Self {
        Self::Application {
            state: OperationState::Canceled,
            source: err.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
