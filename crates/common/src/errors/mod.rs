//! Error types for ResearchForge
//!
//! Provides a single error taxonomy for the research pipeline:
//! - Input errors that abort a request
//! - Provider, fetch, extraction and analysis errors that degrade it
//! - HTTP status code mapping for the gateway
//! - Structured `{status, message}` error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    ValidationError,

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    ProviderError,
    FetchError,
    RobotsDisallowed,
    Timeout,
    ExtractionError,
    AnalysisError,
    CacheError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::ProviderError => 8001,
            ErrorCode::FetchError => 8002,
            ErrorCode::RobotsDisallowed => 8003,
            ErrorCode::Timeout => 8004,
            ErrorCode::ExtractionError => 8005,
            ErrorCode::AnalysisError => 8006,
            ErrorCode::CacheError => 8007,
            ErrorCode::UpstreamError => 8008,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Why a page fetch failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Connection refused, reset, or host unreachable
    Unreachable,
    /// Name resolution failed
    Dns,
    /// TLS handshake or certificate failure
    Tls,
    /// robots.txt forbids the URL; no network fetch was attempted
    RobotsDisallowed,
    /// Server answered with a non-success status
    HttpStatus(u16),
    /// URL could not be parsed or uses an unsupported scheme
    InvalidUrl,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Unreachable => write!(f, "unreachable"),
            FetchErrorKind::Dns => write!(f, "dns"),
            FetchErrorKind::Tls => write!(f, "tls"),
            FetchErrorKind::RobotsDisallowed => write!(f, "robots_disallowed"),
            FetchErrorKind::HttpStatus(code) => write!(f, "http_{}", code),
            FetchErrorKind::InvalidUrl => write!(f, "invalid_url"),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // External collaborators
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Fetch failed for {url} ({kind}): {message}")]
    Fetch {
        url: String,
        kind: FetchErrorKind,
        message: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Analysis failed: {message}")]
    Analysis { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for an input validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for a provider failure
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a language-model or scoring failure
    pub fn analysis(message: impl Into<String>) -> Self {
        AppError::Analysis {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Provider { .. } => ErrorCode::ProviderError,
            AppError::Fetch {
                kind: FetchErrorKind::RobotsDisallowed,
                ..
            } => ErrorCode::RobotsDisallowed,
            AppError::Fetch { .. } => ErrorCode::FetchError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::Extraction { .. } => ErrorCode::ExtractionError,
            AppError::Analysis { .. } => ErrorCode::AnalysisError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway
            AppError::Provider { .. }
            | AppError::Fetch { .. }
            | AppError::Extraction { .. }
            | AppError::Analysis { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the retry policy should attempt the call again
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Provider { .. }
            | AppError::Timeout { .. }
            | AppError::Analysis { .. }
            | AppError::HttpClient(_) => true,
            AppError::Fetch { kind, .. } => matches!(
                kind,
                FetchErrorKind::Unreachable | FetchErrorKind::HttpStatus(500..=599)
            ),
            _ => false,
        }
    }

    /// Input errors are the only kind that abort a research request
    pub fn is_input_error(&self) -> bool {
        matches!(self, AppError::Validation { .. })
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            status: "error".to_string(),
            message,
            code,
            request_id: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::Fetch {
            url: "https://example.com".into(),
            kind: FetchErrorKind::RobotsDisallowed,
            message: "disallowed".into(),
        };
        assert_eq!(err.code(), ErrorCode::RobotsDisallowed);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Query cannot be empty".into(),
            field: Some("query".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_input_error());
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_only_validation_aborts_research() {
        let provider = AppError::Provider {
            provider: "serper".into(),
            message: "quota exhausted".into(),
        };
        assert!(!provider.is_input_error());
        assert_eq!(provider.code().as_code(), 8001);
        assert_eq!(ErrorCode::ValidationError.as_code(), 1001);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(AppError::provider("serper", "503").is_retryable());
        assert!(AppError::analysis("bad json").is_retryable());
        assert!(AppError::Timeout {
            operation: "search".into(),
            timeout_ms: 10
        }
        .is_retryable());
        assert!(!AppError::Extraction {
            url: "https://example.com".into(),
            message: "empty".into()
        }
        .is_retryable());
        assert!(!AppError::validation("empty").is_retryable());
    }

    #[test]
    fn test_fetch_kind_display() {
        assert_eq!(FetchErrorKind::HttpStatus(404).to_string(), "http_404");
        assert_eq!(FetchErrorKind::RobotsDisallowed.to_string(), "robots_disallowed");
    }
}
