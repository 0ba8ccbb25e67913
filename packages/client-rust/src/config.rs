//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use nexus_core::{DefaultFailureConverter, FailureConverter, SerializerChain};

/// Configuration for [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL of the operation endpoint (e.g. `http://localhost:7243/nexus`).
    pub base_url: String,
    /// Encodes inputs and decodes results.
    pub serializer: Arc<SerializerChain>,
    /// Rebuilds application errors from failures in `execute_operation`.
    pub failure_converter: Arc<dyn FailureConverter>,
    /// Upper bound for the wait hint sent with a single result poll.
    pub max_poll_wait: Duration,
    /// Extra transport timeout on top of the wait hint of a poll.
    pub poll_grace: Duration,
    /// Prebuilt HTTP client; one is built when absent.
    pub http_client: Option<reqwest::Client>,
}

impl ClientOptions {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            serializer: Arc::new(SerializerChain::default()),
            failure_converter: Arc::new(DefaultFailureConverter),
            max_poll_wait: Duration::from_secs(60),
            poll_grace: Duration::from_secs(5),
            http_client: None,
        }
    }
}
