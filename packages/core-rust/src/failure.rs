//! Structured wire failures and the pluggable error <-> failure conversion.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HandlerError, UnsuccessfulOperationError};

/// Structured representation of an application-level error on the wire.
///
/// `details` is opaque to the protocol: it is carried as still-serialized JSON
/// and never validated against a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Human-readable message.
    pub message: String,
    /// Open-ended string context (e.g. application error type).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Arbitrary structured details.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl Failure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// An error that carries an explicit [`Failure`].
///
/// Produced when a failure is reconstructed from the wire, or constructed by
/// an application that wants full control over what crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", failure.message)]
pub struct FailureError {
    pub failure: Failure,
}

impl From<Failure> for FailureError {
    fn from(failure: Failure) -> Self {
        Self { failure }
    }
}

/// Converts application errors to wire failures and back.
///
/// Hosts substitute their own implementation to layer a typed error taxonomy
/// over the wire `Failure`, e.g. by encoding the error type in metadata.
pub trait FailureConverter: Send + Sync + fmt::Debug {
    /// Renders an error as a wire failure.
    fn error_to_failure(&self, err: &anyhow::Error) -> Failure;

    /// Reconstructs an error from a wire failure.
    fn failure_to_error(&self, failure: Failure) -> anyhow::Error;
}

/// Identity pairing: errors carrying a `Failure` round-trip losslessly, any
/// other error becomes a failure holding only its display message.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFailureConverter;

impl FailureConverter for DefaultFailureConverter {
    fn error_to_failure(&self, err: &anyhow::Error) -> Failure {
        carried_failure(err).unwrap_or_else(|| Failure::new(err.to_string()))
    }

    fn failure_to_error(&self, failure: Failure) -> anyhow::Error {
        anyhow::Error::new(FailureError { failure })
    }
}

/// Finds a failure already attached to `err` or one of its sources.
fn carried_failure(err: &anyhow::Error) -> Option<Failure> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<FailureError>() {
            Some(e.failure.clone())
        } else if let Some(e) = cause.downcast_ref::<UnsuccessfulOperationError>() {
            Some(e.failure.clone())
        } else {
            cause
                .downcast_ref::<HandlerError>()
                .map(|e| e.failure.clone())
        }
    })
}
