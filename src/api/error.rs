//! Error types for remote API calls.
//!
//! Variants carry the method name and enough context to log every failure
//! with the operation that produced it.

use thiserror::Error;

/// Errors that can occur while invoking the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error calling {method}: {source}")]
    Network {
        /// API method that was being invoked.
        method: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout calling {method}")]
    Timeout {
        /// API method that was being invoked.
        method: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} calling {method}")]
    HttpStatus {
        /// API method that was being invoked.
        method: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body was not the structured object the API promises.
    #[error("malformed response from {method}: {detail}")]
    MalformedResponse {
        /// API method that was being invoked.
        method: String,
        /// What was wrong with the body.
        detail: String,
    },

    /// All retry attempts were exhausted for a transient failure.
    #[error("retries exhausted calling {method} after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// API method that was being invoked.
        method: String,
        /// Total attempts made, including the first.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<ApiError>,
    },
}

impl ApiError {
    /// Creates a network error from a reqwest error.
    pub fn network(method: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            method: method.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(method: impl Into<String>) -> Self {
        Self::Timeout {
            method: method.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(method: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            method: method.into(),
            status,
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            method: method.into(),
            detail: detail.into(),
        }
    }

    /// Wraps the final attempt's error once the retry ceiling is reached.
    pub fn exhausted(method: impl Into<String>, attempts: u32, source: ApiError) -> Self {
        Self::RetriesExhausted {
            method: method.into(),
            attempts,
            source: Box::new(source),
        }
    }
}
