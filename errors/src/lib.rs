//! # Semantic Query Errors
//!
//! Error taxonomy shared by every component of the semantic query client.
//!
//! - Uses `thiserror` for structured error definitions
//! - Every variant carries a human-readable message plus a machine-readable
//!   [`ErrorKind`]
//! - Conversion failures are represented but never escape a query: they are
//!   logged and downgraded to a raw response

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while running a semantic query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Empty or otherwise invalid query, rejected before any network activity.
    #[error("Invalid query: {reason}")]
    Validation { reason: String },

    /// The signed connection parameters could not be produced.
    #[error("Signing failed: {reason}")]
    Signing { reason: String },

    /// Handshake failure or connect timeout.
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    /// Error event on an established stream.
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// Stream closed with no fragment, or a deadline elapsed without settlement.
    #[error("Response timed out: {reason}")]
    ResponseTimeout { reason: String },

    /// Post-processing call failed. Recovered locally.
    #[error("Conversion failed: {reason}")]
    Conversion { reason: String },

    /// The persisted key-value surface rejected a read or write.
    #[error("Storage error on {key}: {reason}")]
    Storage { key: String, reason: String }
}

/// Coarse classification of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Signing,
    Connection,
    Transport,
    ResponseTimeout,
    Conversion,
    Storage
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Signing => "signing",
            ErrorKind::Connection => "connection",
            ErrorKind::Transport => "transport",
            ErrorKind::ResponseTimeout => "response_timeout",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Storage => "storage"
        };
        f.write_str(name)
    }
}

impl QueryError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into()
        }
    }

    pub fn signing(reason: impl Into<String>) -> Self {
        Self::Signing {
            reason: reason.into()
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into()
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into()
        }
    }

    pub fn response_timeout(reason: impl Into<String>) -> Self {
        Self::ResponseTimeout {
            reason: reason.into()
        }
    }

    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::Conversion {
            reason: reason.into()
        }
    }

    pub fn storage(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            reason: reason.into()
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Signing { .. } => ErrorKind::Signing,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::ResponseTimeout { .. } => ErrorKind::ResponseTimeout,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::Storage { .. } => ErrorKind::Storage
        }
    }

    /// True for failures where opening a fresh connection may help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Transport { .. })
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display() {
        let errors = vec![
            (
                QueryError::validation("query must not be empty"),
                "Invalid query: query must not be empty"
            ),
            (
                QueryError::connection("connect timed out after 10000ms"),
                "Connection failed: connect timed out after 10000ms"
            ),
            (
                QueryError::response_timeout("connection closed before any response"),
                "Response timed out: connection closed before any response"
            ),
            (
                QueryError::storage("semantic-query-history", "disk full"),
                "Storage error on semantic-query-history: disk full"
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_query_error_kind() {
        assert_eq!(QueryError::signing("x").kind(), ErrorKind::Signing);
        assert_eq!(QueryError::transport("x").kind(), ErrorKind::Transport);
        assert_eq!(QueryError::conversion("x").kind(), ErrorKind::Conversion);
        assert_eq!(ErrorKind::ResponseTimeout.to_string(), "response_timeout");
    }

    #[test]
    fn test_query_error_retryable() {
        assert!(QueryError::connection("refused").is_retryable());
        assert!(QueryError::transport("reset").is_retryable());
        assert!(!QueryError::validation("empty").is_retryable());
        assert!(!QueryError::response_timeout("closed").is_retryable());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ResponseTimeout).unwrap();
        assert_eq!(json, "\"response_timeout\"");
    }
}
