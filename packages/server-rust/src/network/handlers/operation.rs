//! The four operation endpoints.
//!
//! Each request is decoded into a [`HandlerContext`] plus call-specific
//! options, dispatched to the application [`Handler`](crate::traits::Handler),
//! and the outcome is mapped to the status codes and headers callers expect.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use nexus_core::wire::{
    parse_duration, read_content_header, read_request_header, state_header_value,
    HEADER_OPERATION_STATE, HEADER_REQUEST_ID, STATUS_OPERATION_RUNNING,
};
use nexus_core::{Content, Failure, OperationInfo, OperationState};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use super::response::{content_response, error_response, failure_response};
use super::AppState;
use crate::service::operation::{
    GetOperationResultOptions, HandlerContext, OperationResult, StartOperationOptions,
    StartOperationResult,
};

/// Query string of a start request.
#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    /// Callback URL for asynchronous completion delivery.
    pub callback: Option<String>,
}

/// Query string of a get-result request.
#[derive(Debug, Default, Deserialize)]
pub struct ResultQuery {
    /// Go-style duration the caller is willing to wait.
    pub wait: Option<String>,
}

/// Builds a context from request headers.
///
/// Callers hold a drop guard on the context token so it is cancelled both
/// when the handler returns and when the caller disconnects mid-request.
fn request_context(headers: &HeaderMap) -> HandlerContext {
    HandlerContext::new(read_request_header(headers))
}

/// `POST /{operation}`
pub async fn start_operation_handler(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Query(query): Query<StartQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = headers
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let span = info_span!("start_operation", operation = %operation, request_id = %request_id);

    async move {
        let ctx = request_context(&headers);
        let _cancel_on_drop = ctx.cancellation_token().clone().drop_guard();
        let input = Content {
            header: read_content_header(&headers),
            data: body,
        };
        let options = StartOperationOptions {
            request_id,
            callback_url: query.callback,
        };

        match state
            .handler
            .start_operation(&ctx, &operation, input, &options)
            .await
        {
            Ok(StartOperationResult::Sync(content)) => {
                debug!("operation completed synchronously");
                content_response(StatusCode::OK, content)
            }
            Ok(StartOperationResult::Async { operation_id }) => {
                debug!(operation_id = %operation_id, "operation started asynchronously");
                (StatusCode::CREATED, Json(OperationInfo::running(operation_id))).into_response()
            }
            Err(err) => error_response(err, state.config.failure_converter.as_ref()),
        }
    }
    .instrument(span)
    .await
}

/// `GET /{operation}/{operation_id}/result`
pub async fn get_operation_result_handler(
    State(state): State<AppState>,
    Path((operation, operation_id)): Path<(String, String)>,
    Query(query): Query<ResultQuery>,
    headers: HeaderMap,
) -> Response {
    let span = info_span!("get_operation_result", operation = %operation, operation_id = %operation_id);

    async move {
        // An empty `wait=` counts as absent.
        let wait_param = query.wait.as_deref().map(str::trim).filter(|w| !w.is_empty());
        let requested = match wait_param.map(parse_duration).transpose() {
            Ok(wait) => wait.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "rejecting malformed wait parameter");
                return failure_response(
                    StatusCode::BAD_REQUEST,
                    Failure::new(format!("invalid wait query parameter: {err}")),
                    None,
                );
            }
        };
        let wait = state.config.clamp_wait(requested);
        if wait < requested {
            debug!(requested_ms = requested.as_millis(), wait_ms = wait.as_millis(), "clamped wait");
        }

        let mut ctx = request_context(&headers);
        if !wait.is_zero() {
            ctx = ctx.with_deadline(Instant::now() + wait);
        }
        let _cancel_on_drop = ctx.cancellation_token().clone().drop_guard();
        let options = GetOperationResultOptions { wait };

        match state
            .handler
            .get_operation_result(&ctx, &operation, &operation_id, &options)
            .await
        {
            Ok(OperationResult::Ready(content)) => content_response(StatusCode::OK, content),
            Ok(OperationResult::StillRunning) => (
                STATUS_OPERATION_RUNNING,
                [(HEADER_OPERATION_STATE, state_header_value(OperationState::Running))],
            )
                .into_response(),
            Err(err) => error_response(err, state.config.failure_converter.as_ref()),
        }
    }
    .instrument(span)
    .await
}

/// `GET /{operation}/{operation_id}`
pub async fn get_operation_info_handler(
    State(state): State<AppState>,
    Path((operation, operation_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let span = info_span!("get_operation_info", operation = %operation, operation_id = %operation_id);

    async move {
        let ctx = request_context(&headers);
        let _cancel_on_drop = ctx.cancellation_token().clone().drop_guard();
        match state
            .handler
            .get_operation_info(&ctx, &operation, &operation_id)
            .await
        {
            Ok(info) => (StatusCode::OK, Json(info)).into_response(),
            Err(err) => error_response(err, state.config.failure_converter.as_ref()),
        }
    }
    .instrument(span)
    .await
}

/// `POST /{operation}/{operation_id}/cancel`
pub async fn cancel_operation_handler(
    State(state): State<AppState>,
    Path((operation, operation_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let span = info_span!("cancel_operation", operation = %operation, operation_id = %operation_id);

    async move {
        let ctx = request_context(&headers);
        let _cancel_on_drop = ctx.cancellation_token().clone().drop_guard();
        match state
            .handler
            .cancel_operation(&ctx, &operation, &operation_id)
            .await
        {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(err) => error_response(err, state.config.failure_converter.as_ref()),
        }
    }
    .instrument(span)
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
