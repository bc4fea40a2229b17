//! Protocol Errors

use thiserror::Error;

/// A message that cannot be accepted by the protocol layer.
///
/// These are per-message failures: callers drop the offending message and
/// keep the session alive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload is not valid JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The `jsonrpc` version tag is absent
    #[error("Missing protocol version tag")]
    MissingVersion,

    /// The `jsonrpc` version tag is present but not supported
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Valid JSON that is not a request, response, or notification
    #[error("Invalid message shape: {0}")]
    InvalidShape(String),

    /// A response referencing a request id nobody is waiting on
    #[error("Unknown request id: {0}")]
    UnknownRequestId(String),

    /// Content-Length framing could not be parsed
    #[error("Invalid framing: {0}")]
    Framing(String),
}

impl ProtocolError {
    pub fn invalid_shape(msg: impl Into<String>) -> Self {
        Self::InvalidShape(msg.into())
    }
}
