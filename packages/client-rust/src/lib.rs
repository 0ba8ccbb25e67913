//! Nexus Client: starts operations over HTTP, long-polls for their results,
//! and runs operations to completion.

pub mod client;
pub mod config;
pub mod error;
pub mod handle;

pub use client::{Client, ExecuteOperationOptions, StartOperationOptions};
pub use config::ClientOptions;
pub use error::{ClientError, ClientResult};
pub use handle::{GetResultOptions, OperationHandle};
