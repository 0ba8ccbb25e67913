//! Handler-facing side of the protocol.
//!
//! 1. **Configuration** (`config`): long-poll ceiling and failure conversion
//! 2. **Operation types** (`operation`): context, options, results, errors
//! 3. **Registry** (`registry`): typed operations grouped into services and
//!    exposed as a single [`Handler`](crate::traits::Handler)

pub mod config;
pub mod operation;
pub mod registry;

pub use config::HandlerConfig;
pub use operation::{
    GetOperationResultOptions, HandlerContext, OperationError, OperationResult,
    StartOperationOptions, StartOperationResult,
};
pub use registry::{OperationHandler, RegistryHandler, Service, ServiceRegistry, SyncOperation};
