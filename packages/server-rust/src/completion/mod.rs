//! Asynchronous completion callbacks: delivering results to a callback URL
//! and accepting them on the caller side.

pub mod receiver;
pub mod sender;

pub use receiver::{completion_router, CompletionHandler, CompletionRequest};
pub use sender::deliver_completion;

use nexus_core::WireError;

/// Errors from delivering a completion callback.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion content header: {0}")]
    Wire(#[from] WireError),

    #[error("failed to encode failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("completion rejected: {status} - {message}")]
    Rejected { status: u16, message: String },
}
