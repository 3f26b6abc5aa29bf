//! Prompt text for the two language-model calls in a conversation turn.

use serde_json::Value;

use crate::chat::intent::Intent;
use crate::scan::ScanContext;

pub const CLASSIFY_SYSTEM: &str = "You route questions from parents about a scanned baby or \
household product. Reply with JSON only: {\"intent\": <one of the allowed values>, \
\"confidence\": <0..1>}. Use unclear_intent when the question fits none of the categories.";

pub const SYNTH_SYSTEM: &str = "You are BabyShield, a cautious product-safety assistant for \
parents. Explain the facts you are given in plain language. Never invent recalls, \
regulations or ingredients that are not in the facts. Always include a short disclaimer \
that this is not medical advice. Reply with a single JSON object matching the schema; \
do not add fields.";

pub fn classify_user_prompt(query: &str) -> String {
    let allowed = Intent::ALL
        .iter()
        .map(|i| i.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("Allowed intents: {}\n\nQuestion: {}", allowed, query.trim())
}

pub fn synth_user_prompt(
    intent: Intent,
    query: &str,
    scan: &ScanContext,
    tool_output: &Value,
) -> String {
    let mut prompt = format!(
        "Intent: {}\nQuestion: {}\nProduct: {}",
        intent.as_str(),
        query.trim(),
        scan.display_name()
    );
    if let Some(brand) = &scan.brand {
        prompt.push_str(&format!("\nBrand: {}", brand));
    }
    if let Some(category) = &scan.category {
        prompt.push_str(&format!("\nCategory: {}", category));
    }
    if let Some(jurisdiction) = &scan.jurisdiction {
        prompt.push_str(&format!("\nJurisdiction: {}", jurisdiction));
    }
    prompt.push_str("\n\nFacts:\n");
    match serde_json::to_string_pretty(tool_output) {
        Ok(pretty) => prompt.push_str(&pretty),
        Err(_) => prompt.push_str(&tool_output.to_string()),
    }
    prompt
}
