//! # Operation Client
//!
//! HTTP client for starting operations on a Nexus endpoint, resuming known
//! operations, and running an operation to completion in one call.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nexus_core::wire::{write_content_header, HEADER_REQUEST_ID, QUERY_CALLBACK};
use nexus_core::{OperationInfo, OperationState, WireError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientOptions;
use crate::error::{error_from_response, ClientError, ClientResult};
use crate::handle::{GetResultOptions, OperationHandle};

/// Options for [`Client::start_operation`].
#[derive(Debug, Clone, Default)]
pub struct StartOperationOptions {
    /// Idempotency token; the server generates one when absent.
    pub request_id: Option<String>,
    /// URL the handler should push the terminal result to.
    pub callback_url: Option<String>,
    /// Extra request headers, sent as-is.
    pub header: BTreeMap<String, String>,
}

/// Options for [`Client::execute_operation`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOperationOptions {
    pub start: StartOperationOptions,
    /// Total time to wait for an asynchronous result; `None` waits until the
    /// operation completes or `cancel` fires.
    pub wait: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    options: ClientOptions,
}

/// Client for one operation endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("max_poll_wait", &self.inner.options.max_poll_wait)
            .field("poll_grace", &self.inner.options.poll_grace)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new client with the given options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidUrl` if the base URL does not parse or
    /// cannot carry path segments, and `ClientError::Http` if the HTTP client
    /// cannot be built.
    pub fn new(options: ClientOptions) -> ClientResult<Self> {
        let base_url = Url::parse(&options.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("'{}': {e}", options.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!(
                "'{}' cannot be used as a base URL",
                options.base_url
            )));
        }

        let http = match &options.http_client {
            Some(http) => http.clone(),
            None => reqwest::Client::builder()
                .user_agent(format!("nexus-client/{}", env!("CARGO_PKG_VERSION")))
                .build()?,
        };

        info!(base_url = %base_url, "created Nexus client");

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                options,
            }),
        })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// `{base}/{operation}/{rest...}` with every part as one encoded segment.
    pub(crate) fn operation_url(&self, operation: &str, rest: &[&str]) -> ClientResult<Url> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .push(operation)
            .extend(rest);
        Ok(url)
    }

    /// Starts an operation.
    ///
    /// A synchronous completion yields a handle already in the `succeeded`
    /// state whose result is read lazily; an asynchronous start yields a
    /// handle carrying the operation ID.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Unsuccessful` if the operation failed or was
    /// canceled during the start call, `ClientError::Handler` for other
    /// error responses, and encoding or transport errors otherwise.
    pub async fn start_operation<T: Serialize + Any>(
        &self,
        operation: &str,
        input: &T,
        options: StartOperationOptions,
    ) -> ClientResult<OperationHandle> {
        let content = self.inner.options.serializer.serialize(input)?;

        let mut url = self.operation_url(operation, &[])?;
        if let Some(callback) = &options.callback_url {
            url.query_pairs_mut().append_pair(QUERY_CALLBACK, callback);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &options.header {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|_| WireError::InvalidHeaderName(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| WireError::InvalidHeaderValue { name: name.clone() })?;
            headers.insert(header_name, header_value);
        }
        if let Some(request_id) = &options.request_id {
            let value = HeaderValue::from_str(request_id).map_err(|_| WireError::InvalidHeaderValue {
                name: HEADER_REQUEST_ID.to_string(),
            })?;
            headers.insert(HEADER_REQUEST_ID, value);
        }
        write_content_header(&content.header, &mut headers)?;

        debug!(operation, url = %url, "starting operation");
        let response = self
            .inner
            .http
            .post(url)
            .headers(headers)
            .body(content.data)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(OperationHandle::synchronous(
                self.clone(),
                operation.to_string(),
                response,
            )),
            StatusCode::CREATED => {
                let info: OperationInfo = response.json().await?;
                if info.state != OperationState::Running {
                    warn!(operation, operation_id = %info.id, state = %info.state, "async start reported a non-running state");
                }
                debug!(operation, operation_id = %info.id, "operation started asynchronously");
                Ok(OperationHandle::asynchronous(
                    self.clone(),
                    operation.to_string(),
                    info.id,
                    info.state,
                ))
            }
            _ => Err(error_from_response(response).await),
        }
    }

    /// Handle for an operation started earlier, e.g. by another process.
    ///
    /// The handle assumes `running` until the server reports otherwise.
    #[must_use]
    pub fn get_handle(&self, operation: &str, operation_id: &str) -> OperationHandle {
        OperationHandle::asynchronous(
            self.clone(),
            operation.to_string(),
            operation_id.to_string(),
            OperationState::Running,
        )
    }

    /// Starts an operation and waits for its decoded result.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Application` (built by the configured failure
    /// converter) if the operation failed or was canceled, and any error of
    /// [`Client::start_operation`] or [`OperationHandle::result`] otherwise.
    pub async fn execute_operation<I, O>(
        &self,
        operation: &str,
        input: &I,
        options: ExecuteOperationOptions,
    ) -> ClientResult<O>
    where
        I: Serialize + Any,
        O: DeserializeOwned + Any,
    {
        let handle = self
            .start_operation(operation, input, options.start)
            .await
            .map_err(|err| self.application_error(err))?;
        let result = handle
            .result(GetResultOptions {
                wait: options.wait,
                cancel: options.cancel,
            })
            .await;
        handle.close().await;

        let content = result.map_err(|err| self.application_error(err))?;
        Ok(self.inner.options.serializer.deserialize::<O>(&content)?)
    }

    fn application_error(&self, err: ClientError) -> ClientError {
        match err {
            ClientError::Unsuccessful(err) => ClientError::Application {
                state: err.state,
                source: self.inner.options.failure_converter.failure_to_error(err.failure),
            },
            other => other,
        }
    }
}
