//! Error types for mirror operations.

use thiserror::Error;

/// Result type for mirror operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors a mirror backend reports to the sync core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Credentials rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Quota or rate limit exceeded.
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// The remote answered with an error status.
    #[error("remote rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Body or reason.
        message: String,
    },

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The collection or key is not addressable.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The call did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,
}

impl RemoteError {
    /// Creates a retryable network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps an error status code onto the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            429 => Self::Quota(message),
            _ => Self::Rejected { status, message },
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network { retryable, .. } => *retryable,
            RemoteError::Timeout => true,
            RemoteError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::network("connection reset").is_retryable());
        assert!(!RemoteError::network_fatal("bad certificate").is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::from_status(503, "unavailable").is_retryable());
        assert!(!RemoteError::from_status(400, "bad json").is_retryable());
        assert!(!RemoteError::Auth("expired token".into()).is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            RemoteError::from_status(401, "nope"),
            RemoteError::Auth(_)
        ));
        assert!(matches!(
            RemoteError::from_status(429, "slow down"),
            RemoteError::Quota(_)
        ));
        assert_eq!(RemoteError::Timeout.to_string(), "operation timed out");
    }
}
