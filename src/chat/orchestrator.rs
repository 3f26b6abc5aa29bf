//! One conversation turn: classify, gather facts, synthesize.
//!
//! Stages run strictly in order. Each gets `min(stage budget, remaining total
//! budget)`; when a stage times out or its circuit is open it substitutes a
//! canned value and the turn carries on. Errors leave this module only for
//! scan resolution problems or an explanation that breaks its contract.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::emergency::detect_emergency;
use crate::chat::explanation::{EmergencyNotice, ExplanationResult};
use crate::chat::intent::{Classification, ClassificationSource, Intent, IntentClassifier};
use crate::chat::synthesis::{SynthesisOutcome, Synthesizer};
use crate::chat::tools::{ToolOutput, run_tool_for_intent};
use crate::clients::LlmClient;
use crate::config::Config;
use crate::error::{BabyShieldError, Result};
use crate::resilience::{CallRunner, CircuitBreaker};
use crate::scan::{ScanContext, ScanStore};

/// Inbound turn. Either `scan_id` or inline `scan_data` must be present;
/// inline data wins when both are.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversationRequest {
    pub scan_id: Option<String>,
    pub scan_data: Option<ScanContext>,
    pub user_query: Option<String>,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

impl ConversationRequest {
    pub fn for_scan(scan_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            scan_id: Some(scan_id.into()),
            user_query: Some(user_query.into()),
            ..Default::default()
        }
    }

    pub fn with_scan_data(scan: ScanContext, user_query: impl Into<String>) -> Self {
        Self {
            scan_data: Some(scan),
            user_query: Some(user_query.into()),
            ..Default::default()
        }
    }
}

/// Wall-clock spent in each stage, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnTrace {
    pub classify_ms: u64,
    pub tool_ms: u64,
    pub synth_ms: u64,
    pub total_ms: u64,
    /// Stages that substituted a canned value
    pub degraded: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_source: Option<ClassificationSource>,
    pub explanation: ExplanationResult,
    pub tool_output: Value,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<&'static str>,
    pub trace: TurnTrace,
    pub created_at: DateTime<Utc>,
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

pub struct ChatOrchestrator {
    classifier: IntentClassifier,
    synthesizer: Synthesizer,
    scans: Arc<dyn ScanStore>,
    runner: CallRunner,
    tool_timeout: Duration,
    total_budget: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        scans: Arc<dyn ScanStore>,
        breaker: Arc<CircuitBreaker>,
        runner: CallRunner,
        config: &Config,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(llm.clone(), breaker.clone(), runner.clone(), config),
            synthesizer: Synthesizer::new(llm, breaker, runner.clone(), config),
            scans,
            runner,
            tool_timeout: config.chat.tool_timeout(),
            total_budget: config.chat.total_budget(),
        }
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    async fn resolve_scan(&self, request: &mut ConversationRequest) -> Result<ScanContext> {
        if let Some(scan) = request.scan_data.take() {
            return Ok(scan);
        }
        let Some(scan_id) = request.scan_id.as_deref() else {
            return Err(BabyShieldError::InvalidParams {
                message: "either scan_id or scan_data is required".to_string(),
            });
        };
        match self.scans.get_scan(scan_id).await? {
            Some(scan) => Ok(scan),
            None => Err(BabyShieldError::NotFound {
                scan_id: scan_id.to_string(),
            }),
        }
    }

    async fn run_tools(
        &self,
        intent: Intent,
        scan: &ScanContext,
        timeout: Duration,
    ) -> Option<ToolOutput> {
        if timeout.is_zero() {
            return None;
        }
        let scan = scan.clone();
        let outcome = self
            .runner
            .call_blocking_with_timeout(
                move || Ok::<_, Infallible>(run_tool_for_intent(intent, &scan)),
                timeout,
            )
            .await;
        match outcome {
            Ok(output) => Some(output),
            Err(err) => {
                warn!(
                    intent = intent.as_str(),
                    error = %err,
                    "tool stage degraded to empty output"
                );
                None
            }
        }
    }

    /// Run one turn under the total budget.
    pub async fn handle_turn(&self, mut request: ConversationRequest) -> Result<ChatReply> {
        let started = Instant::now();
        let remaining = |budget: Duration| budget.saturating_sub(started.elapsed());
        let mut trace = TurnTrace::default();

        let scan = self.resolve_scan(&mut request).await?;
        let conversation_id = request
            .conversation_id
            .take()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let query = request.user_query.as_deref().unwrap_or("");
        let emergency = detect_emergency(query);

        let stage = Instant::now();
        let classification = self
            .classifier
            .classify_within(Some(query), remaining(self.total_budget))
            .await;
        trace.classify_ms = elapsed_ms(stage);
        let intent = classification.intent();
        if let Classification::Unclear(reason) = &classification
            && reason.is_failure()
        {
            trace.degraded.push("classify");
        }

        let stage = Instant::now();
        let tool_budget = self.tool_timeout.min(remaining(self.total_budget));
        let tool_output = match self.run_tools(intent, &scan, tool_budget).await {
            Some(output) => output,
            None => {
                trace.degraded.push("tools");
                ToolOutput::empty()
            }
        };
        trace.tool_ms = elapsed_ms(stage);

        let stage = Instant::now();
        let (mut explanation, fallback_reason) = if intent == Intent::UnclearIntent {
            (ExplanationResult::fallback(), Some("unclear_intent"))
        } else {
            let outcome = self
                .synthesizer
                .synthesize(intent, query, &scan, &tool_output, remaining(self.total_budget))
                .await?;
            match outcome {
                SynthesisOutcome::Explained(explanation) => (explanation, None),
                SynthesisOutcome::Fallback(reason) => {
                    trace.degraded.push("synthesis");
                    (ExplanationResult::fallback(), Some(reason.label()))
                }
            }
        };
        trace.synth_ms = elapsed_ms(stage);

        attach_emergency(&mut explanation, emergency);
        trace.total_ms = elapsed_ms(started);

        if trace.total_ms > self.total_budget.as_millis() as u64 {
            warn!(total_ms = trace.total_ms, "turn exceeded total budget");
        }
        if let Some(reason) = fallback_reason {
            info!(
                conversation_id = %conversation_id,
                intent = intent.as_str(),
                reason,
                "replying with fallback explanation"
            );
        } else {
            debug!(
                conversation_id = %conversation_id,
                intent = intent.as_str(),
                total_ms = trace.total_ms,
                "turn complete"
            );
        }

        Ok(ChatReply {
            conversation_id,
            intent,
            intent_source: classification.source(),
            explanation,
            tool_output: tool_output.to_value(),
            fallback_used: fallback_reason.is_some(),
            fallback_reason,
            trace,
            created_at: Utc::now(),
        })
    }
}

/// A detected red flag always wins over whatever the model said.
fn attach_emergency(explanation: &mut ExplanationResult, detected: Option<EmergencyNotice>) {
    if detected.is_some() {
        explanation.emergency = detected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::explanation::EmergencyLevel;
    use crate::clients::LlmError;
    use crate::resilience::{BreakerConfig, ManualClock};
    use crate::scan::InMemoryScanStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat_json(
            &self,
            _model: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _response_schema: &Value,
            _timeout: Duration,
        ) -> std::result::Result<Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"summary": "Check pasteurisation.", "disclaimer": "Not medical advice."}))
        }
    }

    fn orchestrator(llm: Arc<CannedLlm>, store: Arc<InMemoryScanStore>) -> ChatOrchestrator {
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerConfig::default(),
            Arc::new(ManualClock::new()),
        ));
        ChatOrchestrator::new(llm, store, breaker, CallRunner::new(4), &Config::default())
    }

    fn canned() -> Arc<CannedLlm> {
        Arc::new(CannedLlm {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_missing_scan_is_not_found() {
        let orch = orchestrator(canned(), Arc::new(InMemoryScanStore::new()));
        let err = orch
            .handle_turn(ConversationRequest::for_scan("nope", "any recalls?"))
            .await
            .unwrap_err();
        assert!(matches!(err, BabyShieldError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_request_without_scan_is_invalid() {
        let orch = orchestrator(canned(), Arc::new(InMemoryScanStore::new()));
        let err = orch
            .handle_turn(ConversationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BabyShieldError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_stored_scan_full_turn() {
        let store = Arc::new(InMemoryScanStore::new());
        store
            .insert(
                "s1",
                ScanContext {
                    category: Some("cheese".into()),
                    ..Default::default()
                },
            )
            .await;
        let llm = canned();
        let orch = orchestrator(llm.clone(), store);

        let mut request = ConversationRequest::for_scan("s1", "Safe while pregnant?");
        request.conversation_id = Some("conv-1".into());
        let reply = orch.handle_turn(request).await.unwrap();

        assert_eq!(reply.conversation_id, "conv-1");
        assert_eq!(reply.intent, Intent::PregnancyRisk);
        assert_eq!(reply.intent_source, Some(ClassificationSource::Heuristic));
        assert!(!reply.fallback_used);
        assert_eq!(reply.explanation.summary, "Check pasteurisation.");
        assert_eq!(reply.tool_output["risks"][0], json!("soft_cheese_pasteurisation"));
        // heuristic hit, so only the synthesis call reached the model
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unclear_turn_skips_synthesis_and_gets_new_id() {
        let llm = canned();
        let orch = orchestrator(llm.clone(), Arc::new(InMemoryScanStore::new()));
        let reply = orch
            .handle_turn(ConversationRequest::with_scan_data(ScanContext::default(), "   "))
            .await
            .unwrap();
        assert_eq!(reply.intent, Intent::UnclearIntent);
        assert!(reply.fallback_used);
        assert_eq!(reply.fallback_reason, Some("unclear_intent"));
        assert!(reply.explanation.summary.starts_with("I can help with baby safety questions"));
        assert_eq!(reply.tool_output, json!({}));
        assert!(Uuid::parse_str(&reply.conversation_id).is_ok());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_emergency_notice_survives_fallback() {
        let orch = orchestrator(canned(), Arc::new(InMemoryScanStore::new()));
        let reply = orch
            .handle_turn(ConversationRequest::with_scan_data(
                ScanContext::default(),
                "help he is choking",
            ))
            .await
            .unwrap();
        let notice = reply.explanation.emergency.unwrap();
        assert_eq!(notice.level, EmergencyLevel::Red);
    }
}
