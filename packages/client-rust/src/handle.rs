//! Client-side reference to a started operation.

use std::time::Duration;

use nexus_core::wire::{format_duration, read_content_header, QUERY_WAIT, STATUS_OPERATION_RUNNING};
use nexus_core::{Content, OperationInfo, OperationState};
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{error_from_response, ClientError, ClientResult};

/// Options for [`OperationHandle::result`].
#[derive(Debug, Clone, Default)]
pub struct GetResultOptions {
    /// Total time to wait for a terminal state. `None` waits until the
    /// operation completes or `cancel` fires; `Some(Duration::ZERO)` checks
    /// once without blocking.
    pub wait: Option<Duration>,
    /// Aborts the wait, including the in-flight poll request.
    pub cancel: Option<CancellationToken>,
}

enum Body {
    /// Asynchronous operation; the result lives on the server.
    Pending,
    /// Synchronous result whose body has not been read yet.
    Unread(reqwest::Response),
    /// Result already read and cached.
    Read(Content),
    Closed,
}

enum Poll {
    Ready(Content),
    Running,
}

/// Handle to an operation started (or looked up) through a [`Client`].
///
/// Synchronous starts hold the result body until it is read; asynchronous
/// ones poll the server. The handle remembers the last observed state and
/// rejects any transition out of a terminal state.
pub struct OperationHandle {
    client: Client,
    operation: String,
    id: Option<String>,
    state: parking_lot::Mutex<OperationState>,
    body: tokio::sync::Mutex<Body>,
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("operation", &self.operation)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl OperationHandle {
    pub(crate) fn synchronous(client: Client, operation: String, response: reqwest::Response) -> Self {
        Self {
            client,
            operation,
            id: None,
            state: parking_lot::Mutex::new(OperationState::Succeeded),
            body: tokio::sync::Mutex::new(Body::Unread(response)),
        }
    }

    pub(crate) fn asynchronous(
        client: Client,
        operation: String,
        id: String,
        state: OperationState,
    ) -> Self {
        Self {
            client,
            operation,
            id: Some(id),
            state: parking_lot::Mutex::new(state),
            body: tokio::sync::Mutex::new(Body::Pending),
        }
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Operation ID; `None` for an operation that completed synchronously.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Last observed state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        *self.state.lock()
    }

    /// Returns the operation result, polling the server until a terminal
    /// state arrives or the wait runs out.
    ///
    /// A synchronous result is returned without any network call.
    ///
    /// # Errors
    ///
    /// - `ClientError::Unsuccessful` if the operation failed or was canceled
    /// - `ClientError::StillRunning` if `wait` elapsed first
    /// - `ClientError::Cancelled` if `cancel` fired first
    /// - `ClientError::HandleClosed` after [`OperationHandle::close`]
    /// - `ClientError::Protocol` if the server reports a state change out of
    ///   an already observed terminal state
    pub async fn result(&self, options: GetResultOptions) -> ClientResult<Content> {
        {
            let mut body = self.body.lock().await;
            match std::mem::replace(&mut *body, Body::Closed) {
                Body::Closed => return Err(ClientError::HandleClosed),
                Body::Read(content) => {
                    *body = Body::Read(content.clone());
                    return Ok(content);
                }
                Body::Unread(response) => {
                    let content = read_content(response).await?;
                    *body = Body::Read(content.clone());
                    return Ok(content);
                }
                Body::Pending => *body = Body::Pending,
            }
        }

        let id = self.id.as_deref().ok_or(ClientError::MissingOperationId)?;
        let max_poll = self.client.options().max_poll_wait;
        let deadline = options.wait.and_then(|wait| Instant::now().checked_add(wait));

        loop {
            let hint = deadline.map_or(max_poll, |d| {
                d.saturating_duration_since(Instant::now()).min(max_poll)
            });
            let poll = self.poll_once(id, hint);
            let outcome = match &options.cancel {
                Some(token) => tokio::select! {
                    outcome = poll => outcome,
                    () = token.cancelled() => return Err(ClientError::Cancelled),
                },
                None => poll.await,
            };

            if let Poll::Ready(content) = outcome? {
                let mut body = self.body.lock().await;
                if matches!(*body, Body::Pending) {
                    *body = Body::Read(content.clone());
                }
                return Ok(content);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ClientError::StillRunning);
            }
        }
    }

    /// Fetches the current ID and state from the server.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MissingOperationId` for a synchronous operation,
    /// `ClientError::Protocol` on a terminal-state regression, and transport
    /// or handler errors otherwise.
    pub async fn get_info(&self) -> ClientResult<OperationInfo> {
        let id = self.id.as_deref().ok_or(ClientError::MissingOperationId)?;
        let url = self.client.operation_url(&self.operation, &[id])?;
        let response = self.client.http().get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(error_from_response(response).await);
        }
        let info: OperationInfo = response.json().await?;
        self.observe(info.state)?;
        Ok(info)
    }

    /// Requests cancellation. Returns once the server accepted the request;
    /// observe the `canceled` state through [`OperationHandle::result`].
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MissingOperationId` for a synchronous operation,
    /// and transport or handler errors otherwise.
    pub async fn cancel(&self) -> ClientResult<()> {
        let id = self.id.as_deref().ok_or(ClientError::MissingOperationId)?;
        let url = self.client.operation_url(&self.operation, &[id, "cancel"])?;
        let response = self.client.http().post(url).send().await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(());
        }
        Err(error_from_response(response).await)
    }

    /// Releases any unread response body. Safe to call more than once.
    pub async fn close(&self) {
        *self.body.lock().await = Body::Closed;
    }

    async fn poll_once(&self, id: &str, hint: Duration) -> ClientResult<Poll> {
        let mut url = self.client.operation_url(&self.operation, &[id, "result"])?;
        if !hint.is_zero() {
            url.query_pairs_mut()
                .append_pair(QUERY_WAIT, &format_duration(hint));
        }

        let timeout = hint + self.client.options().poll_grace;
        let response = match self.client.http().get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                debug!(operation = %self.operation, operation_id = %id, "result poll timed out");
                return Ok(Poll::Running);
            }
            Err(err) => return Err(err.into()),
        };

        match response.status() {
            StatusCode::OK => {
                self.observe(OperationState::Succeeded)?;
                Ok(Poll::Ready(read_content(response).await?))
            }
            STATUS_OPERATION_RUNNING => {
                self.observe(OperationState::Running)?;
                Ok(Poll::Running)
            }
            _ => {
                let err = error_from_response(response).await;
                if let ClientError::Unsuccessful(unsuccessful) = &err {
                    self.observe(unsuccessful.state)?;
                }
                Err(err)
            }
        }
    }

    fn observe(&self, next: OperationState) -> ClientResult<()> {
        let mut state = self.state.lock();
        match state.transition_to(next) {
            Ok(updated) => {
                *state = updated;
                Ok(())
            }
            Err(err) => {
                let current = *state;
                warn!(
                    operation = %self.operation,
                    operation_id = ?self.id,
                    state = %current,
                    reported = %next,
                    "server reported a state change out of a terminal state"
                );
                Err(err.into())
            }
        }
    }
}

/// Reads a result body together with its `content-*` headers.
pub(crate) async fn read_content(response: reqwest::Response) -> ClientResult<Content> {
    let header = read_content_header(response.headers());
    let data = response.bytes().await?;
    Ok(Content { header, data })
}
