//! Response builders shared by the operation endpoints.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use nexus_core::wire::{
    state_header_value, write_content_header, HEADER_OPERATION_STATE, STATUS_OPERATION_FAILED,
};
use nexus_core::{Content, Failure, FailureConverter, HandlerError, OperationState};
use tracing::{error, warn};

use crate::service::operation::OperationError;

/// Writes `content` as the response body with its metadata as `content-*` headers.
///
/// No default content type is added: a result without a type goes out without one.
pub fn content_response(status: StatusCode, content: Content) -> Response {
    let mut headers = HeaderMap::new();
    if let Err(err) = write_content_header(&content.header, &mut headers) {
        error!(error = %err, "handler produced content with an invalid header");
        return internal_error_response();
    }
    let mut response = Response::new(Body::from(content.data));
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response
}

/// A JSON failure body, optionally tagged with an operation state header.
pub fn failure_response(
    status: StatusCode,
    failure: Failure,
    state: Option<OperationState>,
) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(state) = state {
        headers.insert(HEADER_OPERATION_STATE, state_header_value(state));
    }
    (status, headers, Json(failure)).into_response()
}

/// The generic 500 sent for faults whose details stay server-side.
pub fn internal_error_response() -> Response {
    failure_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        HandlerError::internal().failure,
        None,
    )
}

/// Maps a handler error to its wire response.
pub fn error_response(err: OperationError, converter: &dyn FailureConverter) -> Response {
    match err {
        OperationError::Unsuccessful(err) => {
            failure_response(STATUS_OPERATION_FAILED, err.failure, Some(err.state))
        }
        OperationError::Application { state, source } => {
            let state = if state.is_unsuccessful() {
                state
            } else {
                warn!(%state, "application error carried a non-failure state, reporting failed");
                OperationState::Failed
            };
            let failure = converter.error_to_failure(&source);
            failure_response(STATUS_OPERATION_FAILED, failure, Some(state))
        }
        OperationError::Handler(err) => {
            if err.status.is_server_error() {
                warn!(status = %err.status, error = %err.failure.message, "handler returned server error");
            }
            failure_response(err.status, err.failure, None)
        }
        OperationError::Internal(err) => {
            error!(error = ?err, "handler failed with an internal error");
            internal_error_response()
        }
    }
}
