//! Endpoint that accepts completions pushed by a handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use nexus_core::content::is_media_type;
use nexus_core::serializer::MEDIA_TYPE_JSON;
use nexus_core::wire::{read_content_header, read_request_header, read_state};
use nexus_core::{Content, Failure, HandlerError, OperationCompletion, OperationState};
use tracing::{info_span, warn, Instrument};

use crate::network::handlers::response::failure_response;

/// A decoded completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub completion: OperationCompletion,
    /// Non-content request headers, lower-cased.
    pub header: BTreeMap<String, String>,
}

/// Application hook invoked for each valid completion callback.
#[async_trait]
pub trait CompletionHandler: Send + Sync + 'static {
    /// Accepts or rejects a completion. An `Err` is sent back with its status.
    async fn complete_operation(&self, request: CompletionRequest) -> Result<(), HandlerError>;
}

/// Router accepting completion callbacks on `POST /`.
///
/// Nest or serve it wherever callback URLs point.
pub fn completion_router(handler: Arc<dyn CompletionHandler>) -> Router {
    Router::new()
        .route("/", post(completion_endpoint))
        .with_state(handler)
}

async fn completion_endpoint(
    State(handler): State<Arc<dyn CompletionHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let span = info_span!("complete_operation");
    async move {
        let completion = match parse_completion(&headers, body) {
            Ok(completion) => completion,
            Err(err) => {
                warn!(error = %err.failure.message, "rejecting completion callback");
                return failure_response(err.status, err.failure, None);
            }
        };
        let request = CompletionRequest {
            completion,
            header: read_request_header(&headers),
        };
        match handler.complete_operation(request).await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(err) => failure_response(err.status, err.failure, None),
        }
    }
    .instrument(span)
    .await
}

fn parse_completion(headers: &HeaderMap, body: Bytes) -> Result<OperationCompletion, HandlerError> {
    let state = read_state(headers)
        .map_err(|err| HandlerError::bad_request(format!("invalid operation state header: {err}")))?
        .ok_or_else(|| HandlerError::bad_request("missing operation state header"))?;

    match state {
        OperationState::Succeeded => Ok(OperationCompletion::succeeded(Content {
            header: read_content_header(headers),
            data: body,
        })),
        OperationState::Failed | OperationState::Canceled => {
            let content_type = headers
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            if !is_media_type(content_type, MEDIA_TYPE_JSON) {
                return Err(HandlerError::bad_request(
                    "invalid request content type: expected application/json",
                ));
            }
            let failure: Failure = serde_json::from_slice(&body)
                .map_err(|err| HandlerError::bad_request(format!("invalid failure body: {err}")))?;
            OperationCompletion::unsuccessful(state, failure)
                .map_err(|err| HandlerError::bad_request(err.to_string()))
        }
        OperationState::Running => Err(HandlerError::bad_request(
            "invalid request operation state: running",
        )),
    }
}
