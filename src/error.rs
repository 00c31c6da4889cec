//! Error types shared by the transport, the registry and the client.

use serde_json::Value;
use thiserror::Error;

/// Failure reported by a [`Transport`](crate::transport::Transport).
///
/// Stored verbatim in cache entries, so it is `Clone` and carries only owned,
/// plain data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The server answered with a non-success status code.
    #[error("request failed with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error payload, parsed as JSON when possible, otherwise a JSON string.
        body: Value,
    },

    /// The request never produced a response (connection refused, DNS, ...).
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The response arrived but its body could not be decoded.
    #[error("parsing failed: {0}")]
    Parse(String),

    /// The transport gave up waiting for a response.
    #[error("request timed out")]
    Timeout,
}

impl TransportError {
    /// Returns the HTTP status code, if the server produced one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the error payload, if the server produced one.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Returns the server's `{"error": "..."}` message, if present.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.body()?.get("error")?.as_str()
    }
}

/// Error information kept in a cache entry.
pub type ErrorInfo = TransportError;

/// Errors surfaced by [`QueryClient`](crate::client::QueryClient) operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("endpoint {0:?} is already registered")]
    DuplicateEndpoint(String),

    #[error("endpoint {0:?} is not registered")]
    UnknownEndpoint(String),

    #[error("endpoint {name:?} is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("failed to encode arguments: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The call needs to start a request but no tokio runtime is running.
    #[error("no tokio runtime is available to run the request")]
    NoRuntime,
}

impl Error {
    pub(crate) fn encode(err: &serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }

    pub(crate) fn decode(err: &serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// A request rejected before it was sent. Lists every problem found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid request: {}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    /// Returns `Ok` if `problems` is empty, otherwise the error listing them.
    ///
    /// # Errors
    ///
    /// Returns `Err` when at least one problem was found.
    pub fn check(problems: Vec<String>) -> Result<(), Self> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self { problems })
        }
    }
}

/// Internal reasons a completed fetch is not written to the cache.
///
/// Never surfaced to consumers; the coordinator logs and drops it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StaleResultDiscarded {
    #[error("a newer request superseded this one")]
    Superseded,

    #[error("the entry was evicted while the request was in flight")]
    Evicted,
}
