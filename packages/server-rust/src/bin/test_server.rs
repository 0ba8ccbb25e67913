//! Standalone operation endpoint for manual testing.
//!
//! Serves one `demo` service:
//! - `demo/echo` -- synchronous, returns its JSON input unchanged
//! - `demo/delay` -- asynchronous, completes with `message` after `millis`
//!
//! ```sh
//! test-server --port 7243 --max-wait-ms 30000
//! curl -X POST localhost:7243/demo%2Fdelay -d '{"millis":2000,"message":"hi"}' \
//!     -H 'content-type: application/json'
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use nexus_core::{Failure, OperationCompletion, OperationInfo, SerializerChain};
use nexus_server::network::{NetworkConfig, NetworkModule};
use nexus_server::service::config::HandlerConfig;
use nexus_server::service::operation::{
    GetOperationResultOptions, HandlerContext, OperationError, OperationResult,
    StartOperationOptions, StartOperationResult,
};
use nexus_server::service::registry::{OperationHandler, Service, ServiceRegistry, SyncOperation};
use nexus_server::store::MemoryOperationStore;
use serde::Deserialize;
use tracing::{info, warn};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "test-server")]
#[command(about = "Nexus operation endpoint with demo operations")]
struct Args {
    /// Bind address for the HTTP server.
    #[arg(long, default_value = "127.0.0.1", env = "NEXUS_HOST")]
    host: String,

    /// HTTP port to listen on. 0 picks a free port.
    #[arg(short, long, default_value_t = 0, env = "NEXUS_PORT")]
    port: u16,

    /// Ceiling for get-result long polls, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "NEXUS_MAX_WAIT_MS")]
    max_wait_ms: u64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Deserialize)]
struct DelayInput {
    millis: u64,
    message: String,
}

/// Completes with the given message after a delay, unless canceled first.
struct DelayOperation {
    store: Arc<MemoryOperationStore>,
    serializer: SerializerChain,
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
            let content = self
                .serializer
                .serialize(&input.message)
                .map_err(|err| OperationError::Internal(err.into()))?;
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
                if let Err(err) = store.complete(&id, completion) {
                    warn!(operation_id = %id, error = %err, "failed to record completion");
                }
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

fn demo_service(store: Arc<MemoryOperationStore>) -> Result<Service> {
    let echo = SyncOperation::new(
        "echo",
        |_ctx, input: serde_json::Value, _opts| async move { Ok::<_, OperationError>(input) },
    );
    let delay = DelayOperation {
        store,
        serializer: SerializerChain::default(),
    };
    Ok(Service::new("demo")
        .with_operation(echo)?
        .with_operation(delay)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("nexus_server=info".parse()?)
        .add_directive("test_server=info".parse()?);
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(demo_service(Arc::new(MemoryOperationStore::new()))?)?;
    let handler = Arc::new(registry.new_handler(SerializerChain::default()));

    let handler_config = HandlerConfig {
        get_result_max_wait_ms: args.max_wait_ms,
        ..HandlerConfig::default()
    };
    let network_config = NetworkConfig {
        host: args.host,
        port: args.port,
        request_timeout: Duration::from_millis(args.max_wait_ms) + Duration::from_secs(30),
    };

    let mut module = NetworkModule::new(network_config, handler, handler_config);
    let port = module.start().await?;
    info!(port, max_wait_ms = args.max_wait_ms, "test server ready");

    module
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutting down");
        })
        .await
}
