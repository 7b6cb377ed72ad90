//! Error types for the load-test harness.

use std::time::Duration;

use thiserror::Error;

/// Failure of one attempt to deliver a request and read its reply.
///
/// Every variant takes the same path in the worker: the connection is
/// evicted and the request is retried or recorded as `ERROR`.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Dial or WebSocket handshake failed.
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Writing the request frame failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Reading the reply frame failed.
    #[error("read failed: {0}")]
    Read(String),

    /// A connect, write or read deadline expired.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The reply could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The service answered `status: ERROR` under the strict status policy.
    #[error("service rejected message: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn connect(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// True for failures that happened before a connection existed.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect { .. })
            || matches!(self, Self::Timeout { operation, .. } if *operation == "connect")
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Setup-time failures. Nothing in the running pipeline produces these.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The telemetry sink could not be created.
    #[error("telemetry sink error: {0}")]
    Telemetry(String),

    /// The collector task could not be started or joined.
    #[error("collector error: {0}")]
    Collector(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for HarnessError {
    fn from(err: csv::Error) -> Self {
        Self::Telemetry(err.to_string())
    }
}

/// Result type for harness setup operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
