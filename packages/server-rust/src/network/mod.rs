//! HTTP transport: configuration, middleware, the operation dispatcher, and
//! the server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use handlers::{operation_router, AppState};
pub use module::NetworkModule;
