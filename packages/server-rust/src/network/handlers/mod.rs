//! HTTP handler definitions for the operation endpoint.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and the route table mapping protocol paths to handlers.

pub mod operation;
pub mod response;

pub use operation::{
    cancel_operation_handler, get_operation_info_handler, get_operation_result_handler,
    start_operation_handler,
};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::service::config::HandlerConfig;
use crate::traits::Handler;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// Application handler receiving every operation call.
    pub handler: Arc<dyn Handler>,
    /// Long-poll ceiling and failure conversion.
    pub config: Arc<HandlerConfig>,
}

/// Route table for the four operation calls, without middleware.
///
/// `operation` is a single path segment; names containing `/` arrive
/// percent-encoded and are decoded before reaching the handler.
pub fn operation_routes() -> Router<AppState> {
    Router::new()
        .route("/{operation}", post(start_operation_handler))
        .route("/{operation}/{operation_id}", get(get_operation_info_handler))
        .route(
            "/{operation}/{operation_id}/result",
            get(get_operation_result_handler),
        )
        .route(
            "/{operation}/{operation_id}/cancel",
            post(cancel_operation_handler),
        )
}

/// Bare operation router with state attached, for embedding or tests.
pub fn operation_router(handler: Arc<dyn Handler>, config: HandlerConfig) -> Router {
    operation_routes().with_state(AppState {
        handler,
        config: Arc::new(config),
    })
}
