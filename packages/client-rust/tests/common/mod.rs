//! Shared fixtures: a served operation endpoint plus scripted and
//! registry-backed handlers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nexus_core::{
    Content, Failure, HandlerError, OperationCompletion, OperationInfo, OperationState,
    SerializerChain, UnsuccessfulOperationError,
};
use nexus_server::{
    GetOperationResultOptions, Handler, HandlerConfig, HandlerContext, MemoryOperationStore,
    NetworkConfig, NetworkModule, OperationError, OperationHandler, OperationResult, Service,
    ServiceRegistry, StartOperationOptions, StartOperationResult, SyncOperation,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// A running operation endpoint, shut down on drop.
pub struct TestServer {
    pub base_url: String,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn serve(handler: Arc<dyn Handler>, handler_config: HandlerConfig) -> TestServer {
    let config = NetworkConfig {
        host: "127.0.0.1".to_string(),
        ..NetworkConfig::default()
    };
    let mut module = NetworkModule::new(config, handler, handler_config);
    let port = module.start().await.unwrap();
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        module
            .serve(async move { signal.cancelled().await })
            .await
            .unwrap();
    });
    TestServer {
        base_url: format!("http://127.0.0.1:{port}/"),
        shutdown,
    }
}

// ---------------------------------------------------------------------------
// Scripted handler
// ---------------------------------------------------------------------------

/// Behaviour keyed on operation name and operation ID.
///
/// Start: `sync` echoes its input and the `echo` request header, `async`
/// returns ID `async`, `fail`/`cancel` end unsuccessfully, `bad` is a 400.
/// Result: ID `async` is ready, `running` waits out the deadline, `failed`
/// reports failure. Info: `failed` and `zombie` report failed, anything else
/// running, so a `zombie` result poll regresses out of a terminal state.
#[derive(Default)]
pub struct ScriptedHandler {
    pub canceled: Mutex<Vec<String>>,
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn start_operation(
        &self,
        ctx: &HandlerContext,
        operation: &str,
        input: Content,
        _options: &StartOperationOptions,
    ) -> Result<StartOperationResult, OperationError> {
        match operation {
            "sync" => {
                let mut output = input;
                if let Some(echo) = ctx.header.get("echo") {
                    output = output.with_header("echo", echo.clone());
                }
                Ok(StartOperationResult::Sync(output))
            }
            "async" => Ok(StartOperationResult::Async {
                operation_id: "async".to_string(),
            }),
            "fail" => Err(UnsuccessfulOperationError::failed(Failure::new("boom")).into()),
            "cancel" => {
                Err(UnsuccessfulOperationError::canceled(Failure::new("intentional")).into())
            }
            "bad" => Err(HandlerError::bad_request("bad input").into()),
            _ => Err(HandlerError::not_found(format!("unknown operation {operation}")).into()),
        }
    }

    async fn get_operation_result(
        &self,
        ctx: &HandlerContext,
        _operation: &str,
        operation_id: &str,
        _options: &GetOperationResultOptions,
    ) -> Result<OperationResult, OperationError> {
        match operation_id {
            "async" => Ok(OperationResult::Ready(Content::new(
                "application/json",
                "\"done\"",
            ))),
            "failed" => Err(UnsuccessfulOperationError::failed(Failure::new("boom")).into()),
            _ => {
                if ctx.deadline().is_some() {
                    ctx.done().await;
                }
                Ok(OperationResult::StillRunning)
            }
        }
    }

    async fn get_operation_info(
        &self,
        _ctx: &HandlerContext,
        _operation: &str,
        operation_id: &str,
    ) -> Result<OperationInfo, OperationError> {
        let state = if matches!(operation_id, "failed" | "zombie") {
            OperationState::Failed
        } else {
            OperationState::Running
        };
        Ok(OperationInfo {
            id: operation_id.to_string(),
            state,
        })
    }

    async fn cancel_operation(
        &self,
        _ctx: &HandlerContext,
        _operation: &str,
        operation_id: &str,
    ) -> Result<(), OperationError> {
        self.canceled.lock().unwrap().push(operation_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry-backed handler
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DelayInput {
    pub millis: u64,
    pub message: String,
}

/// Completes with `message` after `millis`, unless canceled first.
pub struct DelayOperation {
    pub store: Arc<MemoryOperationStore>,
    pub serializer: SerializerChain,
}

#[async_trait]
impl OperationHandler for DelayOperation {
    type Input = DelayInput;
    type Output = String;

    fn name(&self) -> &str {
        "delay"
    }

    async fn start(
        &self,
        _ctx: &HandlerContext,
        input: DelayInput,
        options: &StartOperationOptions,
    ) -> Result<StartOperationResult<String>, OperationError> {
        let started = self.store.start(options);
        if started.created {
            let content = self.serializer.serialize(&input.message).unwrap();
            let store = Arc::clone(&self.store);
            let id = started.id.clone();
            let cancellation = started.cancellation;
            tokio::spawn(async move {
                let completion = tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(input.millis)) => {
                        OperationCompletion::succeeded(content)
                    }
                    () = cancellation.cancelled() => {
                        OperationCompletion::canceled(Failure::new("operation canceled"))
                    }
                };
                store.complete(&id, completion).unwrap();
            });
        }
        Ok(StartOperationResult::Async {
            operation_id: started.id,
        })
    }

    async fn get_result(
        &self,
        ctx: &HandlerContext,
        operation_id: &str,
        _options: &GetOperationResultOptions,
    ) -> Result<OperationResult<String>, OperationError> {
        self.store
            .wait_result(ctx, operation_id)
            .await?
            .try_map(|content| {
                self.serializer
                    .deserialize::<String>(&content)
                    .map_err(|err| OperationError::Internal(err.into()))
            })
    }

    async fn get_info(
        &self,
        _ctx: &HandlerContext,
        operation_id: &str,
    ) -> Result<OperationInfo, OperationError> {
        Ok(self.store.info(operation_id)?)
    }

    async fn cancel(&self, _ctx: &HandlerContext, operation_id: &str) -> Result<(), OperationError> {
        Ok(self.store.request_cancel(operation_id)?)
    }
}

/// Registry with service `demo`: `echo` (sync), `fail` (sync, always fails),
/// and `delay` (async, store-backed).
pub fn demo_registry() -> Arc<dyn Handler> {
    let echo = SyncOperation::new("echo", |_ctx, input: serde_json::Value, _opts| async move {
        Ok::<_, OperationError>(input)
    });
    let fail = SyncOperation::new("fail", |_ctx, _input: serde_json::Value, _opts| async move {
        Err::<serde_json::Value, _>(OperationError::failed(anyhow::anyhow!("kaput")))
    });
    let delay = DelayOperation {
        store: Arc::new(MemoryOperationStore::new()),
        serializer: SerializerChain::default(),
    };
    let service = Service::new("demo")
        .with_operation(echo)
        .and_then(|s| s.with_operation(fail))
        .and_then(|s| s.with_operation(delay))
        .unwrap();

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(service).unwrap();
    Arc::new(registry.new_handler(SerializerChain::default()))
}
