//! Nexus Server, the HTTP handler side of the operation protocol: axum
//! dispatcher, service registry, completion callbacks, and an in-memory
//! operation store.

pub mod completion;
pub mod network;
pub mod service;
pub mod store;
pub mod traits;

pub use completion::{
    completion_router, deliver_completion, CompletionError, CompletionHandler, CompletionRequest,
};
pub use network::{operation_router, NetworkConfig, NetworkModule};
pub use service::config::HandlerConfig;
pub use service::operation::{
    GetOperationResultOptions, HandlerContext, OperationError, OperationResult,
    StartOperationOptions, StartOperationResult,
};
pub use service::registry::{
    routing_key, OperationHandler, RegistryError, RegistryHandler, Service, ServiceRegistry,
    SyncOperation,
};
pub use store::{MemoryOperationStore, StartedOperation, StoreError};
pub use traits::Handler;
