use std::sync::Arc;
use std::time::Duration;

use nexus_core::{DefaultFailureConverter, FailureConverter};

/// Handler-side protocol configuration.
///
/// Controls the long-poll ceiling and how application errors are rendered
/// as wire failures.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Upper bound for the `wait` of a get-result request, in milliseconds.
    /// Longer caller-requested waits are clamped to this value.
    pub get_result_max_wait_ms: u64,
    /// Converts `OperationError::Application` sources into failures.
    pub failure_converter: Arc<dyn FailureConverter>,
}

impl HandlerConfig {
    #[must_use]
    pub fn get_result_max_wait(&self) -> Duration {
        Duration::from_millis(self.get_result_max_wait_ms)
    }

    /// Clamps a caller-requested wait to the configured ceiling.
    #[must_use]
    pub fn clamp_wait(&self, requested: Duration) -> Duration {
        requested.min(self.get_result_max_wait())
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            get_result_max_wait_ms: 60_000,
            failure_converter: Arc::new(DefaultFailureConverter),
        }
    }
}
