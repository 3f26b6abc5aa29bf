//! The structured explanation returned to users.
//!
//! Payloads from the model are never coerced: unknown keys at any level,
//! out-of-enum values and blank required strings are all rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::clients::openai::validate_against;
use crate::error::{BabyShieldError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Jurisdiction {
    pub code: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    Recall,
    Regulation,
    Guideline,
    Datasheet,
    Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceItem {
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyLevel {
    Red,
    Amber,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyNotice {
    pub level: EmergencyLevel,
    pub reason: String,
    pub cta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExplanationResult {
    pub summary: String,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub disclaimer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<Jurisdiction>,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<EmergencyNotice>,
}

pub const DEFAULT_DISCLAIMER: &str = "This is general safety information, not medical advice. \
     Contact a healthcare professional with concerns.";

impl ExplanationResult {
    pub fn new(summary: impl Into<String>, disclaimer: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            reasons: Vec::new(),
            checks: Vec::new(),
            flags: Vec::new(),
            disclaimer: disclaimer.into(),
            jurisdiction: None,
            evidence: Vec::new(),
            suggested_questions: Vec::new(),
            emergency: None,
        }
    }

    /// Generic reply used whenever a stage degrades.
    pub fn fallback() -> Self {
        let mut result = Self::new(
            "I can help with baby safety questions about this product, such as pregnancy \
             safety, allergens, ingredients, age suitability and recalls. I couldn't put a \
             full answer together just now; please try again or rephrase your question.",
            DEFAULT_DISCLAIMER,
        );
        result.suggested_questions = vec![
            "Is this safe during pregnancy?".to_string(),
            "Does this contain any of my child's allergens?".to_string(),
            "Has this product been recalled?".to_string(),
        ];
        result
    }
}

fn string_array() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

/// JSON schema handed to the model as the response format.
pub fn explanation_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["summary", "disclaimer"],
        "properties": {
            "summary": {"type": "string", "minLength": 1},
            "reasons": string_array(),
            "checks": string_array(),
            "flags": string_array(),
            "disclaimer": {"type": "string", "minLength": 1},
            "jurisdiction": {
                "type": "object",
                "additionalProperties": false,
                "required": ["code", "label"],
                "properties": {
                    "code": {"type": "string"},
                    "label": {"type": "string"}
                }
            },
            "evidence": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["type", "source"],
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": ["recall", "regulation", "guideline", "datasheet", "label"]
                        },
                        "source": {"type": "string"},
                        "id": {"type": "string"},
                        "url": {"type": "string"}
                    }
                }
            },
            "suggested_questions": string_array(),
            "emergency": {
                "type": "object",
                "additionalProperties": false,
                "required": ["level", "reason", "cta"],
                "properties": {
                    "level": {"type": "string", "enum": ["red", "amber"]},
                    "reason": {"type": "string"},
                    "cta": {"type": "string"}
                }
            }
        }
    })
}

/// Strictly convert a model payload into an [`ExplanationResult`].
///
/// The schema check runs first: serde would read an explicit `null` as a
/// missing optional field.
pub fn validate_explanation(payload: Value) -> Result<ExplanationResult> {
    validate_against(&explanation_schema(), &payload)?;
    let result: ExplanationResult =
        serde_json::from_value(payload).map_err(|e| BabyShieldError::Validation {
            message: format!("explanation does not match schema: {}", e),
        })?;
    if result.summary.trim().is_empty() {
        return Err(BabyShieldError::Validation {
            message: "explanation summary is empty".to_string(),
        });
    }
    if result.disclaimer.trim().is_empty() {
        return Err(BabyShieldError::Validation {
            message: "explanation disclaimer is empty".to_string(),
        });
    }
    Ok(result)
}
