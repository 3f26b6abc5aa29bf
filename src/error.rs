//! Domain-specific error types for babyshield-chat

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::clients::LlmError;

/// Main error type for the chat core
#[derive(Error, Debug)]
pub enum BabyShieldError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A structured payload did not conform to its schema
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Not found: scan {scan_id}")]
    NotFound { scan_id: String },

    #[error("Language model error: {message}")]
    Llm { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Feature disabled: {message}")]
    FeatureDisabled { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BabyShieldError {
    /// HTTP status for the conversational endpoints
    pub fn status_code(&self) -> StatusCode {
        match self {
            BabyShieldError::NotFound { .. } => StatusCode::NOT_FOUND,
            BabyShieldError::Validation { .. } => StatusCode::BAD_GATEWAY,
            BabyShieldError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
            BabyShieldError::FeatureDisabled { .. } => StatusCode::FORBIDDEN,
            BabyShieldError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            BabyShieldError::Config { .. } => "CONFIG",
            BabyShieldError::Validation { .. } => "VALIDATION_FAILURE",
            BabyShieldError::Timeout { .. } => "TIMEOUT",
            BabyShieldError::NotFound { .. } => "NOT_FOUND",
            BabyShieldError::Llm { .. } => "LLM_ERROR",
            BabyShieldError::Serialization { .. } => "SERIALIZATION",
            BabyShieldError::InvalidParams { .. } => "INVALID_PARAMS",
            BabyShieldError::FeatureDisabled { .. } => "FEATURE_DISABLED",
            BabyShieldError::Internal { .. } => "INTERNAL",
        }
    }
}

impl From<anyhow::Error> for BabyShieldError {
    fn from(err: anyhow::Error) -> Self {
        BabyShieldError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BabyShieldError {
    fn from(err: serde_json::Error) -> Self {
        BabyShieldError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<LlmError> for BabyShieldError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout { timeout_ms } => BabyShieldError::Timeout {
                operation: "llm call".to_string(),
                timeout_ms,
            },
            LlmError::SchemaViolation(message) => BabyShieldError::Validation { message },
            other => BabyShieldError::Llm {
                message: other.to_string(),
            },
        }
    }
}

/// Convert BabyShieldError to an HTTP response
impl IntoResponse for BabyShieldError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "code": self.code(),
                "status": status.as_u16(),
                "message": self.to_string(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias for chat core operations
pub type Result<T> = std::result::Result<T, BabyShieldError>;
