//! # Client Error Types

use nexus_core::content::is_media_type;
use nexus_core::serializer::MEDIA_TYPE_JSON;
use nexus_core::wire::{read_state, STATUS_OPERATION_FAILED};
use nexus_core::{
    Failure, HandlerError, OperationState, SerializerError, StateError,
    UnsuccessfulOperationError, WireError,
};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

/// Client operation result type
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by the client.
///
/// `Unsuccessful` and `Application` mean the remote operation itself ended
/// `failed` or `canceled`; every other variant is a transport, protocol, or
/// handler fault.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Unsuccessful(#[from] UnsuccessfulOperationError),

    /// An unsuccessful outcome rebuilt through the failure converter.
    #[error("operation {state}: {source}")]
    Application {
        state: OperationState,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization failed: {0}")]
    Serializer(#[from] SerializerError),

    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] StateError),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected response: {status} - {reason}")]
    UnexpectedResponse { status: u16, reason: String },

    #[error("operation still running")]
    StillRunning,

    #[error("operation handle is closed")]
    HandleClosed,

    #[error("synchronous operation has no ID")]
    MissingOperationId,

    #[error("wait for operation result was cancelled")]
    Cancelled,
}

impl ClientError {
    /// Create an unexpected response error
    pub fn unexpected(status: u16, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            status,
            reason: reason.into(),
        }
    }

    /// The terminal state, for operation-level errors.
    #[must_use]
    pub fn operation_state(&self) -> Option<OperationState> {
        match self {
            Self::Unsuccessful(err) => Some(err.state),
            Self::Application { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Check if error is recoverable (worth retrying)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::Handler(e) => e.status.is_server_error(),
            ClientError::StillRunning => true,
            _ => false,
        }
    }
}

/// Builds the error for a response that is neither a result nor a status.
///
/// `424` responses become operation-level errors; anything else becomes a
/// handler error carrying the response's failure body, or its text when the
/// body is not a JSON failure.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return err.into(),
    };

    let is_json = is_media_type(
        headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        MEDIA_TYPE_JSON,
    );
    let failure = is_json
        .then(|| serde_json::from_slice::<Failure>(&body).ok())
        .flatten()
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            if text.is_empty() {
                Failure::new(status.canonical_reason().unwrap_or("unknown error"))
            } else {
                Failure::new(text)
            }
        });

    if status != STATUS_OPERATION_FAILED {
        return HandlerError::with_failure(status, failure).into();
    }
    match read_state(&headers) {
        Ok(Some(state)) => match UnsuccessfulOperationError::new(state, failure) {
            Ok(err) => err.into(),
            Err(err) => err.into(),
        },
        Ok(None) => ClientError::unexpected(status.as_u16(), "missing operation state header"),
        Err(err) => err.into(),
    }
}
