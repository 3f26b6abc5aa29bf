use std::time::Duration;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use reqwest::Client;
use serde_json::{Value, json};

use crate::clients::traits::{LlmClient, LlmError};
use crate::config::LlmConfig;

/// OpenAI-compatible chat completions client with JSON-schema responses.
#[derive(Clone, Debug)]
pub struct OpenAiCompatClient {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
        // Ensure endpoint has the correct path if not provided
        let endpoint = if endpoint.ends_with("/v1/chat/completions") {
            endpoint.to_string()
        } else {
            format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'))
        };

        Self {
            endpoint,
            api_key,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.endpoint, config.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat_json(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        response_schema: &Value,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.0,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "strict": false,
                    "schema": response_schema
                }
            }
        });

        let mut req = self.client.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                LlmError::Transport(e.to_string())
            }
        })?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let text = res.text().await.unwrap_or_default();
            return Err(LlmError::Http { status, body: text });
        }

        let response_json: Value = res
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("invalid completion body: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Parse("completion has no message content".into()))?;

        let parsed = parse_json_object(content)?;
        validate_against(response_schema, &parsed)?;
        Ok(parsed)
    }
}

/// Parse model output as a JSON object, tolerating a fenced code block.
pub fn parse_json_object(content: &str) -> Result<Value, LlmError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let value: Value =
        serde_json::from_str(unfenced).map_err(|e| LlmError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(LlmError::Parse("expected a JSON object".into()));
    }
    Ok(value)
}

/// Check `instance` against a JSON schema, collecting every violation.
pub fn validate_against(schema: &Value, instance: &Value) -> Result<(), LlmError> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| LlmError::SchemaViolation(format!("invalid schema: {}", e)))?;
    let msgs: Vec<String> = match compiled.validate(instance) {
        Ok(()) => return Ok(()),
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    };
    Err(LlmError::SchemaViolation(msgs.join(" | ")))
}
