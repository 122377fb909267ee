//! Error Types for ORGPULSE API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - Conversions from orchestration errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orgpulse_core::{ConfigError, FetchError, ReadError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity exists neither locally nor at the source
    NotFound,

    // ========================================================================
    // Upstream Errors (424, 502)
    // ========================================================================
    /// The parent of the requested entity could not be resolved
    ParentUnresolved,

    /// Refreshing from the source failed and no usable copy exists
    FetchFailed,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Entity store is unreachable or failing
    StoreUnavailable,

    /// No summarizer is configured
    SummarizerUnavailable,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,

            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::ParentUnresolved => StatusCode::FAILED_DEPENDENCY,
            ErrorCode::FetchFailed => StatusCode::BAD_GATEWAY,

            ErrorCode::StoreUnavailable
            | ErrorCode::SummarizerUnavailable
            | ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::NotFound => "Entity not found",
            ErrorCode::ParentUnresolved => "Parent entity could not be resolved",
            ErrorCode::FetchFailed => "Refreshing from the source failed",
            ErrorCode::StoreUnavailable => "Entity store unavailable",
            ErrorCode::SummarizerUnavailable => "Summarizer not configured",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (failing entity, upstream cause)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn summarizer_unavailable() -> Self {
        Self::from_code(ErrorCode::SummarizerUnavailable)
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreUnavailable, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(code = %self.code, message = %self.message, "Request failed");
        }
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM ORCHESTRATION ERRORS
// ============================================================================

fn fetch_details(err: &FetchError) -> serde_json::Value {
    match err {
        FetchError::RateLimited { retry_after_ms } => json!({
            "cause": err.to_string(),
            "retry_after_ms": retry_after_ms,
        }),
        FetchError::DeadlineExceeded { deadline } => json!({
            "cause": err.to_string(),
            "deadline_ms": deadline.as_millis() as u64,
        }),
        _ => json!({ "cause": err.to_string() }),
    }
}

impl From<ReadError> for ApiError {
    fn from(err: ReadError) -> Self {
        let message = err.to_string();
        match &err {
            ReadError::NotFound { kind, key, cause } => ApiError::new(ErrorCode::NotFound, message)
                .with_details(json!({
                    "kind": kind,
                    "key": key,
                    "upstream": fetch_details(cause),
                })),
            ReadError::FetchFailed { kind, key, source } => {
                ApiError::new(ErrorCode::FetchFailed, message).with_details(json!({
                    "kind": kind,
                    "key": key,
                    "upstream": fetch_details(source),
                }))
            }
            ReadError::ParentUnresolved { kind, key, source } => {
                ApiError::new(ErrorCode::ParentUnresolved, message).with_details(json!({
                    "parent_kind": kind,
                    "parent_key": key,
                    "root_cause": source.root().kind_name(),
                }))
            }
            ReadError::StoreUnavailable(_) => ApiError::new(ErrorCode::StoreUnavailable, message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::store_unavailable(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Invalid configuration: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
