//! Turn scan facts and an intent into the final user-facing explanation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::chat::explanation::{ExplanationResult, explanation_schema, validate_explanation};
use crate::chat::intent::Intent;
use crate::chat::tools::ToolOutput;
use crate::clients::{LlmClient, LlmError};
use crate::config::Config;
use crate::error::Result;
use crate::prompts;
use crate::resilience::{CallError, CallRunner, CircuitBreaker, LLM_SYNTHESIZE_KEY};
use crate::scan::ScanContext;

/// Why synthesis degraded to the canned explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    CircuitOpen,
    Timeout,
    BudgetExhausted,
    LlmFailed(String),
}

impl FallbackReason {
    pub fn label(&self) -> &'static str {
        match self {
            FallbackReason::CircuitOpen => "circuit_open",
            FallbackReason::Timeout => "timeout",
            FallbackReason::BudgetExhausted => "budget_exhausted",
            FallbackReason::LlmFailed(_) => "llm_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Explained(ExplanationResult),
    Fallback(FallbackReason),
}

pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
    runner: CallRunner,
    model: String,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        breaker: Arc<CircuitBreaker>,
        runner: CallRunner,
        config: &Config,
    ) -> Self {
        Self {
            llm,
            breaker,
            runner,
            model: config.llm.synth_model.clone(),
            timeout: config.chat.synth_timeout(),
        }
    }

    /// One guarded model call. Only a payload that breaks the explanation
    /// contract is an error; every dependency problem becomes a fallback.
    pub async fn synthesize(
        &self,
        intent: Intent,
        query: &str,
        scan: &ScanContext,
        tool_output: &ToolOutput,
        budget: Duration,
    ) -> Result<SynthesisOutcome> {
        let timeout = self.timeout.min(budget);
        if timeout.is_zero() {
            return Ok(SynthesisOutcome::Fallback(FallbackReason::BudgetExhausted));
        }
        if !self.breaker.allow(LLM_SYNTHESIZE_KEY) {
            warn!("synthesis skipped, circuit open");
            return Ok(SynthesisOutcome::Fallback(FallbackReason::CircuitOpen));
        }

        let llm = self.llm.clone();
        let model = self.model.clone();
        let user_prompt = prompts::synth_user_prompt(intent, query, scan, &tool_output.to_value());
        let call = async move {
            llm.chat_json(
                &model,
                prompts::SYNTH_SYSTEM,
                &user_prompt,
                &explanation_schema(),
                timeout,
            )
            .await
        };

        let payload: Value = match self.runner.call_with_timeout(call, timeout).await {
            Ok(payload) => {
                self.breaker.record_success(LLM_SYNTHESIZE_KEY);
                payload
            }
            Err(CallError::Inner(err @ LlmError::SchemaViolation(_))) => {
                self.breaker.record_failure(LLM_SYNTHESIZE_KEY);
                return Err(err.into());
            }
            Err(CallError::Timeout { .. }) | Err(CallError::Inner(LlmError::Timeout { .. })) => {
                self.breaker.record_failure(LLM_SYNTHESIZE_KEY);
                warn!(timeout_ms = timeout.as_millis() as u64, "synthesis timed out");
                return Ok(SynthesisOutcome::Fallback(FallbackReason::Timeout));
            }
            Err(err) => {
                self.breaker.record_failure(LLM_SYNTHESIZE_KEY);
                warn!(error = %err, "synthesis call failed");
                return Ok(SynthesisOutcome::Fallback(FallbackReason::LlmFailed(
                    err.to_string(),
                )));
            }
        };

        let explanation = validate_explanation(payload)?;
        debug!(intent = intent.as_str(), "synthesis produced explanation");
        Ok(SynthesisOutcome::Explained(explanation))
    }
}
