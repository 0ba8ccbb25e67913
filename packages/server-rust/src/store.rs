//! In-memory bookkeeping for asynchronous operations.
//!
//! Tracks each operation's terminal outcome, deduplicates starts by request
//! ID, serves long-poll result waits, and fires the completion callback once
//! when an operation first reaches a terminal state.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nexus_core::{HandlerError, OperationCompletion, OperationInfo, OperationState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::deliver_completion;
use crate::service::operation::{
    HandlerContext, OperationError, OperationResult, StartOperationOptions,
};

/// Errors from [`MemoryOperationStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("operation {id} already completed as {state}")]
    AlreadyCompleted { id: String, state: OperationState },
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => HandlerError::not_found(err.to_string()).into(),
            StoreError::AlreadyCompleted { .. } => {
                HandlerError::new(axum::http::StatusCode::CONFLICT, err.to_string()).into()
            }
        }
    }
}

/// A start call recorded by the store.
#[derive(Debug, Clone)]
pub struct StartedOperation {
    pub id: String,
    /// False when the request ID was seen before and the existing operation
    /// was returned; the caller must not start new work.
    pub created: bool,
    /// Fires when cancellation of the operation is requested.
    pub cancellation: CancellationToken,
}

struct StoredOperation {
    callback_url: Option<String>,
    outcome: watch::Sender<Option<OperationCompletion>>,
    cancel: CancellationToken,
}

/// Thread-safe in-memory store of asynchronous operations.
///
/// Entries live until [`MemoryOperationStore::evict_completed`] drops them;
/// without periodic eviction the store grows with every started operation.
/// Meant for demos and tests, not as a durable operation store.
pub struct MemoryOperationStore {
    operations: DashMap<String, Arc<StoredOperation>>,
    by_request_id: DashMap<String, String>,
    http: reqwest::Client,
}

impl MemoryOperationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_http_client(reqwest::Client::new())
    }

    /// Uses `http` for completion callbacks.
    #[must_use]
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self {
            operations: DashMap::new(),
            by_request_id: DashMap::new(),
            http,
        }
    }

    /// Records a new running operation, or returns the one already started
    /// under the same request ID.
    pub fn start(&self, options: &StartOperationOptions) -> StartedOperation {
        match self.by_request_id.entry(options.request_id.clone()) {
            Entry::Occupied(entry) => {
                let id = entry.get().clone();
                debug!(operation_id = %id, request_id = %options.request_id, "duplicate start");
                let cancellation = self
                    .operations
                    .get(&id)
                    .map(|op| op.cancel.clone())
                    .unwrap_or_default();
                StartedOperation {
                    id,
                    created: false,
                    cancellation,
                }
            }
            Entry::Vacant(entry) => {
                let id = Uuid::new_v4().to_string();
                let (outcome, _) = watch::channel(None);
                let cancel = CancellationToken::new();
                self.operations.insert(
                    id.clone(),
                    Arc::new(StoredOperation {
                        callback_url: options.callback_url.clone(),
                        outcome,
                        cancel: cancel.clone(),
                    }),
                );
                entry.insert(id.clone());
                StartedOperation {
                    id,
                    created: true,
                    cancellation: cancel,
                }
            }
        }
    }

    /// Current state of an operation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown ID.
    pub fn info(&self, id: &str) -> Result<OperationInfo, StoreError> {
        let op = self.get(id)?;
        let state = op
            .outcome
            .borrow()
            .as_ref()
            .map_or(OperationState::Running, OperationCompletion::state);
        Ok(OperationInfo {
            id: id.to_string(),
            state,
        })
    }

    /// Publishes the terminal outcome of an operation.
    ///
    /// The first call wins. Publishing the identical outcome again is a
    /// no-op; a different outcome is rejected. The callback, if any, is sent
    /// on the first publish only.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown ID and
    /// `StoreError::AlreadyCompleted` for a conflicting outcome.
    pub fn complete(&self, id: &str, completion: OperationCompletion) -> Result<(), StoreError> {
        let op = self.get(id)?;
        let mut published = false;
        let mut conflict = None;
        op.outcome.send_if_modified(|current| {
            if let Some(existing) = current.as_ref() {
                if *existing != completion {
                    conflict = Some(existing.state());
                }
                return false;
            }
            *current = Some(completion.clone());
            published = true;
            true
        });

        if let Some(state) = conflict {
            warn!(operation_id = %id, %state, attempted = %completion.state(), "rejecting conflicting completion");
            return Err(StoreError::AlreadyCompleted {
                id: id.to_string(),
                state,
            });
        }
        if published {
            info!(operation_id = %id, state = %completion.state(), "operation completed");
            if let Some(url) = op.callback_url.clone() {
                self.spawn_callback(id, url, completion);
            }
        }
        Ok(())
    }

    /// Waits for the outcome until it is published or `ctx` is done.
    ///
    /// Without a deadline on `ctx`, reports the current state immediately.
    ///
    /// # Errors
    ///
    /// Returns not-found for an unknown ID, and the operation-level error
    /// for a failed or canceled operation.
    pub async fn wait_result(
        &self,
        ctx: &HandlerContext,
        id: &str,
    ) -> Result<OperationResult, OperationError> {
        let op = self.get(id)?;
        let mut outcome = op.outcome.subscribe();
        loop {
            let current = outcome.borrow_and_update().clone();
            if let Some(completion) = current {
                return Ok(OperationResult::Ready(completion.into_result()?));
            }
            if ctx.deadline().is_none() || ctx.is_done() {
                return Ok(OperationResult::StillRunning);
            }
            tokio::select! {
                changed = outcome.changed() => {
                    if changed.is_err() {
                        return Ok(OperationResult::StillRunning);
                    }
                }
                () = ctx.done() => return Ok(OperationResult::StillRunning),
            }
        }
    }

    /// Signals the operation's cancellation token. Idempotent; a no-op for
    /// operations that already completed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown ID.
    pub fn request_cancel(&self, id: &str) -> Result<(), StoreError> {
        let op = self.get(id)?;
        if op.outcome.borrow().is_none() {
            debug!(operation_id = %id, "cancellation requested");
            op.cancel.cancel();
        }
        Ok(())
    }

    /// Drops every operation that reached a terminal state, together with
    /// its request-ID mapping. Returns the number of operations removed.
    ///
    /// Callers still polling an evicted operation get not-found afterwards.
    pub fn evict_completed(&self) -> usize {
        let before = self.operations.len();
        self.operations.retain(|_, op| op.outcome.borrow().is_none());
        self.by_request_id
            .retain(|_, id| self.operations.contains_key(id.as_str()));
        let evicted = before.saturating_sub(self.operations.len());
        if evicted > 0 {
            debug!(evicted, "evicted completed operations");
        }
        evicted
    }

    fn get(&self, id: &str) -> Result<Arc<StoredOperation>, StoreError> {
        self.operations
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn spawn_callback(&self, id: &str, url: String, completion: OperationCompletion) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(operation_id = %id, "no runtime available, completion callback skipped");
            return;
        };
        let http = self.http.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            match deliver_completion(&http, &url, &completion).await {
                Ok(()) => debug!(operation_id = %id, "completion delivered"),
                Err(err) => warn!(operation_id = %id, error = %err, "completion delivery failed"),
            }
        });
    }
}

impl Default for MemoryOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use nexus_core::{Content, Failure};
    use tokio::time::Instant;

    use super::*;

    fn options(request_id: &str) -> StartOperationOptions {
        StartOperationOptions {
            request_id: request_id.to_string(),
            callback_url: None,
        }
    }

    fn waiting(wait: Duration) -> HandlerContext {
        HandlerContext::new(BTreeMap::new()).with_deadline(Instant::now() + wait)
    }

    #[test]
    fn start_deduplicates_by_request_id() {
        let store = MemoryOperationStore::new();
        let first = store.start(&options("req-1"));
        let again = store.start(&options("req-1"));
        let other = store.start(&options("req-2"));

        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert_eq!(store.info(&first.id).unwrap().state, OperationState::Running);
    }

    #[test]
    fn terminal_outcome_is_published_once() {
        let store = MemoryOperationStore::new();
        let op = store.start(&options("req-1"));
        let done = OperationCompletion::succeeded(Content::new("text/plain", "ok"));

        store.complete(&op.id, done.clone()).unwrap();
        store.complete(&op.id, done).unwrap();
        let err = store
            .complete(&op.id, OperationCompletion::failed(Failure::new("late")))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::AlreadyCompleted {
                id: op.id.clone(),
                state: OperationState::Succeeded
            }
        );
        assert_eq!(store.info(&op.id).unwrap().state, OperationState::Succeeded);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = MemoryOperationStore::new();
        assert_eq!(
            store.info("nope"),
            Err(StoreError::NotFound("nope".to_string()))
        );
        assert!(store.request_cancel("nope").is_err());
    }

    #[tokio::test]
    async fn wait_without_deadline_returns_immediately() {
        let store = MemoryOperationStore::new();
        let op = store.start(&options("req-1"));
        let result = store
            .wait_result(&HandlerContext::new(BTreeMap::new()), &op.id)
            .await
            .unwrap();
        assert_eq!(result, OperationResult::StillRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_at_deadline() {
        let store = MemoryOperationStore::new();
        let op = store.start(&options("req-1"));
        let start = Instant::now();
        let result = store
            .wait_result(&waiting(Duration::from_millis(200)), &op.id)
            .await
            .unwrap();
        assert_eq!(result, OperationResult::StillRunning);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn wait_wakes_on_completion() {
        let store = Arc::new(MemoryOperationStore::new());
        let op = store.start(&options("req-1"));

        let completer = Arc::clone(&store);
        let id = op.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            completer
                .complete(&id, OperationCompletion::succeeded(Content::new("text/plain", "ok")))
                .unwrap();
        });

        let result = store
            .wait_result(&waiting(Duration::from_secs(5)), &op.id)
            .await
            .unwrap();
        let OperationResult::Ready(content) = result else {
            panic!("expected ready result");
        };
        assert_eq!(content.data.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn wait_reports_unsuccessful_outcome() {
        let store = MemoryOperationStore::new();
        let op = store.start(&options("req-1"));
        store
            .complete(&op.id, OperationCompletion::canceled(Failure::new("stopped")))
            .unwrap();

        let err = store
            .wait_result(&HandlerContext::new(BTreeMap::new()), &op.id)
            .await
            .unwrap_err();
        let OperationError::Unsuccessful(err) = err else {
            panic!("expected unsuccessful error");
        };
        assert_eq!(err.state, OperationState::Canceled);
        assert_eq!(err.failure.message, "stopped");
    }

    #[tokio::test]
    async fn repeated_waits_report_the_same_terminal_outcome() {
        let store = MemoryOperationStore::new();
        let op = store.start(&options("req-1"));
        store
            .complete(
                &op.id,
                OperationCompletion::canceled(Failure::new("stopped").with_metadata("by", "user")),
            )
            .unwrap();

        let mut outcomes = Vec::new();
        for ctx in [HandlerContext::new(BTreeMap::new()), waiting(Duration::from_secs(5))] {
            let err = store.wait_result(&ctx, &op.id).await.unwrap_err();
            let OperationError::Unsuccessful(err) = err else {
                panic!("expected unsuccessful error");
            };
            outcomes.push((err.state, err.failure));
        }
        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(outcomes[0].0, OperationState::Canceled);
        assert_eq!(outcomes[0].1.metadata.get("by").map(String::as_str), Some("user"));
        assert_eq!(store.info(&op.id).unwrap().state, OperationState::Canceled);
    }

    #[test]
    fn evict_completed_keeps_running_operations() {
        let store = MemoryOperationStore::new();
        let running = store.start(&options("req-1"));
        let finished = store.start(&options("req-2"));
        store
            .complete(&finished.id, OperationCompletion::succeeded(Content::default()))
            .unwrap();

        assert_eq!(store.evict_completed(), 1);
        assert_eq!(store.evict_completed(), 0);
        assert_eq!(store.info(&running.id).unwrap().state, OperationState::Running);
        assert_eq!(
            store.info(&finished.id),
            Err(StoreError::NotFound(finished.id.clone()))
        );

        // The request ID of an evicted operation starts fresh work.
        let again = store.start(&options("req-2"));
        assert!(again.created);
        assert_ne!(again.id, finished.id);
        assert!(!store.start(&options("req-1")).created);
    }

    #[test]
    fn cancel_fires_token_until_completed() {
        let store = MemoryOperationStore::new();
        let running = store.start(&options("req-1"));
        store.request_cancel(&running.id).unwrap();
        assert!(running.cancellation.is_cancelled());

        let finished = store.start(&options("req-2"));
        store
            .complete(&finished.id, OperationCompletion::succeeded(Content::default()))
            .unwrap();
        store.request_cancel(&finished.id).unwrap();
        assert!(!finished.cancellation.is_cancelled());
    }
}
