use async_trait::async_trait;
use nexus_core::{Content, HandlerError, OperationInfo};

use crate::service::operation::{
    GetOperationResultOptions, HandlerContext, OperationError, OperationResult,
    StartOperationOptions, StartOperationResult,
};

/// Application-provided implementation of the four operation calls.
///
/// Each inbound request runs on its own task; implementations may block
/// (e.g. while waiting on a backing operation) but must honour
/// [`HandlerContext::done`]. Only `start_operation` is required: the other
/// calls default to a `501 Not Implemented` handler error.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Starts an operation, completing it synchronously or returning an ID.
    async fn start_operation(
        &self,
        ctx: &HandlerContext,
        operation: &str,
        input: Content,
        options: &StartOperationOptions,
    ) -> Result<StartOperationResult, OperationError>;

    /// Returns the result of an operation, blocking up to `options.wait`.
    ///
    /// When the wait elapses first, return `OperationResult::StillRunning`,
    /// never an error.
    async fn get_operation_result(
        &self,
        _ctx: &HandlerContext,
        operation: &str,
        _operation_id: &str,
        _options: &GetOperationResultOptions,
    ) -> Result<OperationResult, OperationError> {
        Err(not_implemented("get result", operation))
    }

    /// Returns the current ID and state of an operation without blocking.
    async fn get_operation_info(
        &self,
        _ctx: &HandlerContext,
        operation: &str,
        _operation_id: &str,
    ) -> Result<OperationInfo, OperationError> {
        Err(not_implemented("get info", operation))
    }

    /// Requests cancellation. Returns once the request is accepted, not once
    /// the operation has stopped.
    async fn cancel_operation(
        &self,
        _ctx: &HandlerContext,
        operation: &str,
        _operation_id: &str,
    ) -> Result<(), OperationError> {
        Err(not_implemented("cancel", operation))
    }
}

fn not_implemented(call: &str, operation: &str) -> OperationError {
    HandlerError::not_implemented(format!("{call} not implemented for operation {operation}")).into()
}
