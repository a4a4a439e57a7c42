//! Error types for the Kubernetes client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur when talking to a Kubernetes API server
#[derive(Debug, Error)]
pub enum KubeError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API server returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API server
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Command execution inside a container failed to start
    #[error("Exec failed: {0}")]
    ExecFailed(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl KubeError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is an "already exists" conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ApiError { status: 409, .. })
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(KubeError::api_error(404, "gone").is_not_found());
        assert!(KubeError::api_error(409, "exists").is_conflict());
        assert!(KubeError::api_error(503, "down").is_server_error());
        assert!(!KubeError::ParseError("x".to_string()).is_not_found());
    }
}
