//! Intent classification for chat queries
//!
//! A keyword heuristic handles most questions with no I/O. Only when no
//! keyword matches does the classifier ask the language model, under the
//! `llm_classify` breaker and a short deadline. Classification never fails:
//! every problem collapses to `unclear_intent` for the caller, while
//! [`Classification`] keeps the reason for logs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::clients::LlmClient;
use crate::config::Config;
use crate::prompts;
use crate::resilience::{CallError, CallRunner, CircuitBreaker, LLM_CLASSIFY_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PregnancyRisk,
    AllergyQuestion,
    IngredientInfo,
    AgeAppropriateness,
    AlternativeProducts,
    RecallDetails,
    UnclearIntent,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::PregnancyRisk,
        Intent::AllergyQuestion,
        Intent::IngredientInfo,
        Intent::AgeAppropriateness,
        Intent::AlternativeProducts,
        Intent::RecallDetails,
        Intent::UnclearIntent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::PregnancyRisk => "pregnancy_risk",
            Intent::AllergyQuestion => "allergy_question",
            Intent::IngredientInfo => "ingredient_info",
            Intent::AgeAppropriateness => "age_appropriateness",
            Intent::AlternativeProducts => "alternative_products",
            Intent::RecallDetails => "recall_details",
            Intent::UnclearIntent => "unclear_intent",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIntent(pub String);

impl fmt::Display for UnknownIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown intent '{}'", self.0)
    }
}

impl std::error::Error for UnknownIntent {}

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| UnknownIntent(s.to_string()))
    }
}

/// Ordered keyword table. Earlier rows win when a query matches several.
/// Keywords are matched against the space-padded normalized query, so a
/// leading or trailing space in a keyword acts as a word boundary.
const HEURISTICS: [(Intent, &[&str]); 6] = [
    (
        Intent::PregnancyRisk,
        &[
            "pregnan",
            "trimester",
            "prenatal",
            "expecting a baby",
            "expecting mother",
        ],
    ),
    (
        Intent::AllergyQuestion,
        &[
            "allerg",
            "anaphyla",
            "peanut",
            "tree nut",
            "gluten",
            "lactose",
            "intoleran",
        ],
    ),
    (
        Intent::IngredientInfo,
        &[
            "ingredient",
            "contain",
            "what's in",
            "what is in",
            "made of",
            "made from",
            "additive",
            "preservative",
        ],
    ),
    (
        Intent::AgeAppropriateness,
        &[
            " age ",
            " ages ",
            "how old",
            "month old",
            "months old",
            "year old",
            "years old",
            "newborn",
            "toddler",
            "appropriate for",
            "suitable for",
        ],
    ),
    (
        Intent::AlternativeProducts,
        &[
            "alternative",
            "instead",
            "substitute",
            "similar product",
            "something else",
            "recommend",
            "swap",
        ],
    ),
    (
        Intent::RecallDetails,
        &[
            "recall",
            "batch",
            "lot number",
            " lot ",
            "withdrawn",
            "safety notice",
            "defect",
        ],
    ),
];

/// Lower-case, map punctuation other than apostrophes to spaces, and pad with
/// a space on both ends.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push(' ');
    for c in query.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '\'' {
            out.push(c);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    if !out.ends_with(' ') {
        out.push(' ');
    }
    out
}

/// First intent whose keyword set matches, in table order.
pub fn heuristic_intent(query: &str) -> Option<Intent> {
    let normalized = normalize_query(query);
    HEURISTICS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
        .map(|(intent, _)| *intent)
}

/// Closed-enum schema for the classification call.
pub fn classification_schema() -> Value {
    let allowed: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "intent": {"type": "string", "enum": allowed},
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
        },
        "required": ["intent"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Heuristic,
    Llm,
}

/// Why a query ended up unclear.
#[derive(Debug, Clone, PartialEq)]
pub enum UnclearReason {
    EmptyQuery,
    /// The model itself answered `unclear_intent`
    ModelUnsure,
    UnknownIntent(String),
    LowConfidence(f64),
    CircuitOpen,
    Timeout,
    LlmFailed(String),
}

impl UnclearReason {
    /// True when the dependency failed rather than genuinely judging the query unclear.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            UnclearReason::CircuitOpen | UnclearReason::Timeout | UnclearReason::LlmFailed(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnclearReason::EmptyQuery => "empty_query",
            UnclearReason::ModelUnsure => "model_unsure",
            UnclearReason::UnknownIntent(_) => "unknown_intent",
            UnclearReason::LowConfidence(_) => "low_confidence",
            UnclearReason::CircuitOpen => "circuit_open",
            UnclearReason::Timeout => "timeout",
            UnclearReason::LlmFailed(_) => "llm_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Classified {
        intent: Intent,
        source: ClassificationSource,
        confidence: Option<f64>,
    },
    Unclear(UnclearReason),
}

impl Classification {
    /// The externally visible intent.
    pub fn intent(&self) -> Intent {
        match self {
            Classification::Classified { intent, .. } => *intent,
            Classification::Unclear(_) => Intent::UnclearIntent,
        }
    }

    pub fn source(&self) -> Option<ClassificationSource> {
        match self {
            Classification::Classified { source, .. } => Some(*source),
            Classification::Unclear(_) => None,
        }
    }

    pub fn unclear_reason(&self) -> Option<&UnclearReason> {
        match self {
            Classification::Unclear(reason) => Some(reason),
            Classification::Classified { .. } => None,
        }
    }
}

/// Interpret a classification payload from the model.
pub fn interpret_llm_payload(payload: &Value, min_confidence: f64) -> Classification {
    let Some(raw) = payload.get("intent").and_then(Value::as_str) else {
        return Classification::Unclear(UnclearReason::LlmFailed(
            "payload has no intent".to_string(),
        ));
    };
    let intent = match raw.parse::<Intent>() {
        Ok(Intent::UnclearIntent) => return Classification::Unclear(UnclearReason::ModelUnsure),
        Ok(intent) => intent,
        Err(UnknownIntent(name)) => {
            return Classification::Unclear(UnclearReason::UnknownIntent(name));
        }
    };

    // A client that skips schema validation can hand back any JSON here
    let confidence = match payload.get("confidence") {
        None => None,
        Some(value) => match value.as_f64() {
            Some(c) if (0.0..=1.0).contains(&c) => Some(c),
            _ => {
                return Classification::Unclear(UnclearReason::LlmFailed(format!(
                    "invalid confidence {}",
                    value
                )));
            }
        },
    };
    if let Some(c) = confidence
        && c < min_confidence
    {
        return Classification::Unclear(UnclearReason::LowConfidence(c));
    }

    Classification::Classified {
        intent,
        source: ClassificationSource::Llm,
        confidence,
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
    runner: CallRunner,
    model: String,
    timeout: Duration,
    min_confidence: f64,
}

impl IntentClassifier {
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
            model: config.llm.classify_model.clone(),
            timeout: config.chat.router_timeout(),
            min_confidence: config.chat.min_confidence,
        }
    }

    /// Classify under the configured router budget.
    pub async fn classify(&self, query: Option<&str>) -> Classification {
        self.classify_within(query, self.timeout).await
    }

    /// Never fails; any problem yields `unclear_intent`.
    pub async fn classify_intent(&self, query: Option<&str>) -> Intent {
        self.classify(query).await.intent()
    }

    /// Classify with the LLM deadline capped at `budget`.
    pub async fn classify_within(&self, query: Option<&str>, budget: Duration) -> Classification {
        let query = query.unwrap_or("");
        if let Some(intent) = heuristic_intent(query) {
            debug!(intent = intent.as_str(), "heuristic intent match");
            return Classification::Classified {
                intent,
                source: ClassificationSource::Heuristic,
                confidence: None,
            };
        }
        if query.trim().is_empty() {
            return Classification::Unclear(UnclearReason::EmptyQuery);
        }

        let outcome = self.classify_with_llm(query, self.timeout.min(budget)).await;
        if let Classification::Unclear(reason) = &outcome {
            if reason.is_failure() {
                warn!(reason = reason.label(), "llm classification degraded to unclear");
            } else {
                debug!(reason = reason.label(), "llm classification unclear");
            }
        }
        outcome
    }

    async fn classify_with_llm(&self, query: &str, timeout: Duration) -> Classification {
        if timeout.is_zero() {
            return Classification::Unclear(UnclearReason::Timeout);
        }
        if !self.breaker.allow(LLM_CLASSIFY_KEY) {
            return Classification::Unclear(UnclearReason::CircuitOpen);
        }

        let llm = self.llm.clone();
        let model = self.model.clone();
        let user_prompt = prompts::classify_user_prompt(query);
        let call = async move {
            llm.chat_json(
                &model,
                prompts::CLASSIFY_SYSTEM,
                &user_prompt,
                &classification_schema(),
                timeout,
            )
            .await
        };

        match self.runner.call_with_timeout(call, timeout).await {
            Ok(payload) => {
                self.breaker.record_success(LLM_CLASSIFY_KEY);
                interpret_llm_payload(&payload, self.min_confidence)
            }
            Err(CallError::Timeout { .. }) => {
                self.breaker.record_failure(LLM_CLASSIFY_KEY);
                Classification::Unclear(UnclearReason::Timeout)
            }
            Err(err) => {
                self.breaker.record_failure(LLM_CLASSIFY_KEY);
                Classification::Unclear(UnclearReason::LlmFailed(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_round_trips_through_str() {
        for intent in Intent::ALL {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
            assert_eq!(
                serde_json::to_value(intent).unwrap(),
                json!(intent.as_str())
            );
        }
        assert!("shopping".parse::<Intent>().is_err());
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("What AGE?"), " what age ");
        assert_eq!(normalize_query(""), " ");
        assert_eq!(normalize_query("What's in it"), " what's in it ");
    }

    #[test]
    fn test_heuristic_examples() {
        assert_eq!(
            heuristic_intent("Is this safe in second trimester?"),
            Some(Intent::PregnancyRisk)
        );
        assert_eq!(
            heuristic_intent("Does it have gluten"),
            Some(Intent::AllergyQuestion)
        );
        assert_eq!(
            heuristic_intent("What ingredients are in this?"),
            Some(Intent::IngredientInfo)
        );
        assert_eq!(
            heuristic_intent("Is it OK for a 3 month old?"),
            Some(Intent::AgeAppropriateness)
        );
        assert_eq!(
            heuristic_intent("Can you suggest an alternative"),
            Some(Intent::AlternativeProducts)
        );
        assert_eq!(
            heuristic_intent("Was this recalled?"),
            Some(Intent::RecallDetails)
        );
        assert_eq!(heuristic_intent("hello there"), None);
        assert_eq!(heuristic_intent(""), None);
    }

    #[test]
    fn test_pregnancy_beats_allergy() {
        assert_eq!(
            heuristic_intent("Is this safe during pregnancy, my child has a peanut allergy"),
            Some(Intent::PregnancyRisk)
        );
    }

    #[test]
    fn test_age_needs_word_boundary() {
        assert_eq!(heuristic_intent("is the package sealed"), None);
        assert_eq!(
            heuristic_intent("what age is this for"),
            Some(Intent::AgeAppropriateness)
        );
    }

    #[test]
    fn test_heuristic_is_idempotent() {
        let q = "Any recall on this batch?";
        assert_eq!(heuristic_intent(q), heuristic_intent(q));
    }

    #[test]
    fn test_interpret_confidence_gate() {
        let low = interpret_llm_payload(
            &json!({"intent": "recall_details", "confidence": 0.49}),
            0.5,
        );
        assert_eq!(low.intent(), Intent::UnclearIntent);
        assert_eq!(low.unclear_reason(), Some(&UnclearReason::LowConfidence(0.49)));

        let ok = interpret_llm_payload(
            &json!({"intent": "recall_details", "confidence": 0.5}),
            0.5,
        );
        assert_eq!(ok.intent(), Intent::RecallDetails);
        assert_eq!(ok.source(), Some(ClassificationSource::Llm));
    }

    #[test]
    fn test_interpret_rejects_unknown_and_missing() {
        let unknown =
            interpret_llm_payload(&json!({"intent": "shopping", "confidence": 0.9}), 0.5);
        assert!(matches!(
            unknown,
            Classification::Unclear(UnclearReason::UnknownIntent(_))
        ));

        let missing = interpret_llm_payload(&json!({"confidence": 0.9}), 0.5);
        assert_eq!(missing.intent(), Intent::UnclearIntent);

        let unsure = interpret_llm_payload(&json!({"intent": "unclear_intent"}), 0.5);
        assert_eq!(unsure.unclear_reason(), Some(&UnclearReason::ModelUnsure));
    }

    #[test]
    fn test_interpret_rejects_malformed_confidence() {
        for confidence in [json!("0.1"), json!({}), json!(null), json!(1.7), json!(-0.2)] {
            let c = interpret_llm_payload(
                &json!({"intent": "allergy_question", "confidence": confidence}),
                0.5,
            );
            assert!(
                matches!(c, Classification::Unclear(UnclearReason::LlmFailed(_))),
                "{confidence}: {c:?}"
            );
        }

        let edge = interpret_llm_payload(
            &json!({"intent": "allergy_question", "confidence": 1.0}),
            0.5,
        );
        assert_eq!(edge.intent(), Intent::AllergyQuestion);
    }

    #[test]
    fn test_interpret_without_confidence_passes() {
        let c = interpret_llm_payload(&json!({"intent": "ingredient_info"}), 0.5);
        assert_eq!(c.intent(), Intent::IngredientInfo);
    }

    #[test]
    fn test_schema_is_closed() {
        let schema = classification_schema();
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["intent"]["enum"].as_array().unwrap().len(), 7);
    }
}
