//! Red-flag phrase detection.
//!
//! Runs on the raw query before any dependency is touched, so the notice is
//! present on every reply, fallback or not.

use crate::chat::explanation::{EmergencyLevel, EmergencyNotice};
use crate::chat::intent::normalize_query;

const RED_CTA: &str =
    "Call your local emergency number now (911 in the US, 999 in the UK, 112 in the EU).";
const AMBER_CTA: &str =
    "Stop using the product and contact your doctor or a poison control centre.";

/// Ordered, red before amber. Matched against the normalized, space-padded query.
const PHRASES: [(EmergencyLevel, &str, &[&str]); 2] = [
    (
        EmergencyLevel::Red,
        "possible medical emergency",
        &[
            "choking",
            "can't breathe",
            "cant breathe",
            "not breathing",
            "stopped breathing",
            "trouble breathing",
            "swallowed a battery",
            "swallowed battery",
            "button battery",
            "swallowed a magnet",
            "swallowed magnet",
            "unconscious",
            "unresponsive",
            "seizure",
            "turning blue",
        ],
    ),
    (
        EmergencyLevel::Amber,
        "possible reaction to the product",
        &[
            " rash",
            "hives",
            "vomit",
            "throwing up",
            "swelling",
            "swollen",
            "ingested",
            "swallowed",
        ],
    ),
];

pub fn detect_emergency(query: &str) -> Option<EmergencyNotice> {
    let normalized = normalize_query(query);
    PHRASES
        .iter()
        .find(|(_, _, phrases)| phrases.iter().any(|p| normalized.contains(p)))
        .map(|(level, reason, _)| EmergencyNotice {
            level: *level,
            reason: (*reason).to_string(),
            cta: match level {
                EmergencyLevel::Red => RED_CTA,
                EmergencyLevel::Amber => AMBER_CTA,
            }
            .to_string(),
        })
}
