//! HTTP wire contract: header names, status codes, and the small codecs used
//! on both sides of the connection.
//!
//! | Call | Method & path | Success status |
//! |------|---------------|----------------|
//! | start | `POST /{operation}` | `200` (sync result) / `201` (async, `OperationInfo`) |
//! | get info | `GET /{operation}/{id}` | `200` (`OperationInfo`) |
//! | get result | `GET /{operation}/{id}/result?wait=` | `200` (result) / `204` (still running) |
//! | cancel | `POST /{operation}/{id}/cancel` | `202` |
//! | completion | `POST {callback}` | `200` |
//!
//! An unsuccessful terminal state travels as [`STATUS_OPERATION_FAILED`] with
//! the state header and a JSON `Failure` body.

use std::collections::BTreeMap;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use http::StatusCode;
use tracing::debug;

use crate::state::{OperationState, StateError};

/// Header carrying the `OperationState` literal on operation-status responses
/// and completion callbacks.
pub const HEADER_OPERATION_STATE: &str = "nexus-operation-state";
/// Idempotency token correlating a start request.
pub const HEADER_REQUEST_ID: &str = "nexus-request-id";
/// Query parameter carrying the callback URL on start.
pub const QUERY_CALLBACK: &str = "callback";
/// Query parameter carrying the long-poll wait on get-result.
pub const QUERY_WAIT: &str = "wait";

/// The operation reached `failed` or `canceled` (as opposed to a server fault).
pub const STATUS_OPERATION_FAILED: StatusCode = StatusCode::FAILED_DEPENDENCY;
/// Get-result found the operation still running when the wait elapsed.
pub const STATUS_OPERATION_RUNNING: StatusCode = StatusCode::NO_CONTENT;

const CONTENT_HEADER_PREFIX: &str = "content-";

/// Errors encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),
    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue { name: String },
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error(transparent)]
    InvalidState(#[from] StateError),
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Writes content metadata as `content-<key>` headers.
///
/// # Errors
///
/// Returns `WireError` if a key or value is not a legal HTTP header.
pub fn write_content_header(
    header: &BTreeMap<String, String>,
    headers: &mut HeaderMap,
) -> Result<(), WireError> {
    for (key, value) in header {
        let name = format!("{CONTENT_HEADER_PREFIX}{}", key.to_ascii_lowercase());
        if name == CONTENT_LENGTH.as_str() {
            continue;
        }
        let header_name = HeaderName::try_from(name.as_str())
            .map_err(|_| WireError::InvalidHeaderName(name.clone()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| WireError::InvalidHeaderValue { name: name.clone() })?;
        headers.insert(header_name, header_value);
    }
    Ok(())
}

/// Collects `content-*` headers (except `content-length`) as content metadata.
#[must_use]
pub fn read_content_header(headers: &HeaderMap) -> BTreeMap<String, String> {
    collect_headers(headers, |name| {
        if name == CONTENT_LENGTH.as_str() {
            return None;
        }
        name.strip_prefix(CONTENT_HEADER_PREFIX)
    })
}

/// Collects every non-content header, lower-cased, joining repeated values.
#[must_use]
pub fn read_request_header(headers: &HeaderMap) -> BTreeMap<String, String> {
    collect_headers(headers, |name| {
        (!name.starts_with(CONTENT_HEADER_PREFIX)).then_some(name)
    })
}

fn collect_headers<'a>(
    headers: &'a HeaderMap,
    select: impl Fn(&'a str) -> Option<&'a str>,
) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Some(key) = select(name.as_str()) else {
            continue;
        };
        let Ok(value) = value.to_str() else {
            debug!(header = %name, "skipping non-UTF-8 header value");
            continue;
        };
        out.entry(key.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

/// Reads the operation-state header, if present.
///
/// # Errors
///
/// Returns `WireError::InvalidState` for a value that is not a state literal.
pub fn read_state(headers: &HeaderMap) -> Result<Option<OperationState>, WireError> {
    let Some(value) = headers.get(HEADER_OPERATION_STATE) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| StateError::Invalid(String::from_utf8_lossy(value.as_bytes()).into_owned()))?;
    Ok(Some(text.parse()?))
}

/// Header value for an operation state.
#[must_use]
pub fn state_header_value(state: OperationState) -> HeaderValue {
    HeaderValue::from_static(state.as_str())
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Formats a wait duration for the `wait` query parameter.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

/// Parses a Go-style duration string: `0`, `300ms`, `1.5s`, `2m`, `1h30m`.
///
/// Accepted units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`.
///
/// # Errors
///
/// Returns `WireError::InvalidDuration` for empty, negative, unit-less or
/// otherwise malformed input.
pub fn parse_duration(input: &str) -> Result<Duration, WireError> {
    let invalid = || WireError::InvalidDuration(input.to_string());
    let text = input.trim();
    let text = text.strip_prefix('+').unwrap_or(text);
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos: u128 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (whole, fraction) = match rest[..number_len].split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (&rest[..number_len], ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        let whole_nanos = parse_digits(whole)
            .and_then(|w| w.checked_mul(scale))
            .ok_or_else(invalid)?;
        let fraction_nanos = fraction_of(fraction, scale).ok_or_else(invalid)?;
        total_nanos = whole_nanos
            .checked_add(fraction_nanos)
            .and_then(|n| total_nanos.checked_add(n))
            .ok_or_else(invalid)?;
    }

    u64::try_from(total_nanos)
        .map(Duration::from_nanos)
        .map_err(|_| invalid())
}

fn parse_digits(digits: &str) -> Option<u128> {
    if digits.is_empty() {
        return Some(0);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Nanoseconds contributed by the fractional digits of a number in `scale` units.
/// Digits beyond nanosecond precision are dropped.
fn fraction_of(fraction: &str, scale: u128) -> Option<u128> {
    let digits = &fraction[..fraction.len().min(18)];
    let value = parse_digits(digits)?;
    let divisor = 10u128.checked_pow(u32::try_from(digits.len()).ok()?)?;
    Some(value * scale / divisor)
}
