//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use babyshield_chat::chat::ChatOrchestrator;
use babyshield_chat::clients::{LlmClient, LlmError};
use babyshield_chat::config::Config;
use babyshield_chat::prompts;
use babyshield_chat::resilience::{BreakerConfig, CallRunner, CircuitBreaker, ManualClock};
use babyshield_chat::scan::{InMemoryScanStore, ScanContext, UserProfile};
use serde_json::{Value, json};

/// What the fake model does for one kind of call
#[derive(Clone)]
pub enum Behavior {
    Json(Value),
    HttpError(u16),
    SchemaViolation,
    Sleep(Duration),
}

impl Behavior {
    async fn run(&self) -> Result<Value, LlmError> {
        match self {
            Behavior::Json(v) => Ok(v.clone()),
            Behavior::HttpError(status) => Err(LlmError::Http {
                status: *status,
                body: "upstream unavailable".into(),
            }),
            Behavior::SchemaViolation => Err(LlmError::SchemaViolation(
                "Additional properties are not allowed".into(),
            )),
            Behavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(json!({}))
            }
        }
    }
}

/// Fake model that answers classification and synthesis calls separately
pub struct ScriptedLlm {
    pub classify: Behavior,
    pub synth: Behavior,
    pub classify_calls: AtomicUsize,
    pub synth_calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(classify: Behavior, synth: Behavior) -> Arc<Self> {
        Arc::new(Self {
            classify,
            synth,
            classify_calls: AtomicUsize::new(0),
            synth_calls: AtomicUsize::new(0),
        })
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn synth_calls(&self) -> usize {
        self.synth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_json(
        &self,
        _model: &str,
        system_prompt: &str,
        _user_prompt: &str,
        _response_schema: &Value,
        _timeout: Duration,
    ) -> Result<Value, LlmError> {
        if system_prompt == prompts::CLASSIFY_SYSTEM {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            self.classify.run().await
        } else {
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            self.synth.run().await
        }
    }
}

pub fn good_explanation() -> Value {
    json!({
        "summary": "This cheese may not be pasteurised.",
        "reasons": ["Soft cheese"],
        "checks": ["Look for 'made with pasteurised milk' on the label"],
        "disclaimer": "General information, not medical advice.",
        "evidence": [{"type": "guideline", "source": "NHS"}]
    })
}

pub fn soft_cheese() -> ScanContext {
    ScanContext {
        product_name: Some("Brie de Meaux".into()),
        category: Some("cheese".into()),
        flags: ["soft_cheese".to_string()].into_iter().collect(),
        ..Default::default()
    }
}

pub fn peanut_snack() -> ScanContext {
    ScanContext {
        product_name: Some("Peanut puffs".into()),
        ingredients: vec!["peanuts".into(), "sugar".into()],
        profile: Some(UserProfile {
            allergies: ["peanut".to_string()].into_iter().collect(),
        }),
        ..Default::default()
    }
}

pub struct Harness {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub breaker: Arc<CircuitBreaker>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryScanStore>,
}

pub fn harness(llm: Arc<ScriptedLlm>, config: &Config) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let breaker = Arc::new(CircuitBreaker::new(
        BreakerConfig::from(&config.breaker),
        clock.clone(),
    ));
    let store = Arc::new(InMemoryScanStore::new());
    let orchestrator = Arc::new(ChatOrchestrator::new(
        llm,
        store.clone(),
        breaker.clone(),
        CallRunner::new(config.chat.worker_pool_size),
        config,
    ));
    Harness {
        orchestrator,
        breaker,
        clock,
        store,
    }
}
