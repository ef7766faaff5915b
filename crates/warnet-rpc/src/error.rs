//! RPC error classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Node warming up (loading block index, verifying blocks).
pub const RPC_IN_WARMUP: i64 = -28;
/// Standard JSON-RPC codes treated as caller mistakes.
const MALFORMED_CODES: [i64; 4] = [-32700, -32600, -32601, -32602];

/// Broad class of an RPC failure, which decides whether it is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    /// The node is not reachable or still starting.
    NotReady,
    /// A not-ready condition outlived the caller's deadline.
    Timeout,
    /// The node processed the request and reported an error.
    Application,
    /// The request itself was invalid.
    Malformed,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotReady => "not ready",
            Self::Timeout => "timeout",
            Self::Application => "application",
            Self::Malformed => "malformed",
        };
        write!(f, "{s}")
    }
}

/// A classified RPC failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} rpc error: {message}")]
pub struct RpcError {
    /// Failure class.
    pub kind: RpcErrorKind,
    /// Node-reported error code, when there is one.
    pub code: Option<i64>,
    /// Human-readable detail.
    pub message: String,
}

impl RpcError {
    /// Creates an error of the given kind.
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// The node cannot be reached yet.
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::NotReady, message)
    }

    /// Deadline expired while the node stayed not ready.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Timeout, message)
    }

    /// The node reported an application error.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Application, message)
    }

    /// The request was malformed.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Malformed, message)
    }

    /// Classifies a JSON-RPC error object returned by a node.
    pub fn from_node(code: i64, message: impl Into<String>) -> Self {
        let kind = if code == RPC_IN_WARMUP {
            RpcErrorKind::NotReady
        } else if MALFORMED_CODES.contains(&code) {
            RpcErrorKind::Malformed
        } else {
            RpcErrorKind::Application
        };
        Self {
            kind,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Returns true if the call should be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind == RpcErrorKind::NotReady
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::not_ready(err.to_string())
        } else if err.is_builder() {
            Self::malformed(err.to_string())
        } else {
            Self::application(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_codes_are_classified() {
        assert_eq!(RpcError::from_node(-28, "Loading block index").kind, RpcErrorKind::NotReady);
        assert_eq!(RpcError::from_node(-32601, "Method not found").kind, RpcErrorKind::Malformed);
        assert_eq!(RpcError::from_node(-5, "Invalid address").kind, RpcErrorKind::Application);
    }

    #[test]
    fn test_only_not_ready_is_retryable() {
        assert!(RpcError::not_ready("refused").is_retryable());
        assert!(!RpcError::timeout("late").is_retryable());
        assert!(!RpcError::application("boom").is_retryable());
        assert!(!RpcError::malformed("bad").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = RpcError::application("Insufficient funds");
        assert_eq!(err.to_string(), "application rpc error: Insufficient funds");
    }
}
