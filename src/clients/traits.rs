use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("llm returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("response violates schema: {0}")]
    SchemaViolation(String),
}

/// A structured-output language model.
///
/// Implementations must return an error on a non-success status and on any
/// payload that does not satisfy `response_schema`. On success the returned
/// value is a JSON object conforming to that schema. Real providers, local
/// models and test doubles are interchangeable behind this trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_json(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        response_schema: &Value,
        timeout: Duration,
    ) -> Result<Value, LlmError>;
}
