//! Delivers a terminal result to a caller-supplied callback URL.

use nexus_core::wire::{state_header_value, write_content_header, HEADER_OPERATION_STATE};
use nexus_core::OperationCompletion;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::debug;

use super::CompletionError;

/// POSTs `completion` to `url`.
///
/// Successful completions carry the result content and its `content-*`
/// headers; failed and canceled ones carry a JSON failure. Every request
/// carries the terminal state header. Delivery is attempted once.
///
/// # Errors
///
/// Returns `CompletionError::Rejected` for a non-2xx response, and transport
/// or encoding errors otherwise.
pub async fn deliver_completion(
    http: &reqwest::Client,
    url: &str,
    completion: &OperationCompletion,
) -> Result<(), CompletionError> {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_OPERATION_STATE, state_header_value(completion.state()));

    let body = match completion {
        OperationCompletion::Successful { content } => {
            write_content_header(&content.header, &mut headers)?;
            content.data.clone()
        }
        OperationCompletion::Unsuccessful { failure, .. } => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            serde_json::to_vec(failure)?.into()
        }
    };

    debug!(url, state = %completion.state(), "delivering completion");
    let response = http.post(url).headers(headers).body(body).send().await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unreadable response body".to_string());
    Err(CompletionError::Rejected {
        status: status.as_u16(),
        message,
    })
}
