//! Network module with deferred startup lifecycle.
//!
//! `new()` captures configuration and the application handler, `start()`
//! binds the TCP listener, and `serve()` accepts connections until the
//! shutdown future resolves. Splitting `start()` from `serve()` lets callers
//! learn the bound port (e.g. for callback URLs) before traffic flows.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{operation_routes, AppState};
use super::middleware::build_http_layers;
use crate::service::config::HandlerConfig;
use crate::traits::Handler;

/// Manages the HTTP server lifecycle for one operation handler.
pub struct NetworkModule {
    config: NetworkConfig,
    state: AppState,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, handler: Arc<dyn Handler>, handler_config: HandlerConfig) -> Self {
        Self {
            config,
            state: AppState {
                handler,
                config: Arc::new(handler_config),
            },
            listener: None,
        }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `POST /{operation}` -- start
    /// - `GET /{operation}/{operation_id}` -- info
    /// - `GET /{operation}/{operation_id}/result` -- result, long-poll via `wait`
    /// - `POST /{operation}/{operation_id}/cancel` -- cancel
    pub fn build_router(&self) -> Router {
        operation_routes()
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Address the listener is bound to, once `start()` has run.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serves requests until `shutdown` resolves, then lets in-flight
    /// requests finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// encounters a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        info!("serving operation endpoint");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("operation endpoint stopped");
        Ok(())
    }
}
