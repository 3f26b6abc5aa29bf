//! Per-intent fact gathering over a scan.
//!
//! Every tool is a pure function of the scan. An unclear or unrecognized
//! intent yields an empty mapping, not an error.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::chat::intent::Intent;
use crate::scan::{RecallRecord, ScanContext};

pub const SOFT_CHEESE_RISK: &str = "soft_cheese_pasteurisation";
pub const UNPASTEURISED_DAIRY_RISK: &str = "unpasteurised_dairy";
pub const VERIFY_LOT_NOTE: &str = "verify batch/lot on label";

const SOFT_CHEESE_NOTE: &str = "Soft cheeses are only considered safe in pregnancy when made \
from pasteurised milk; check the label for pasteurisation because of the Listeria risk.";
const RAW_MILK_NOTE: &str = "Ingredients mention raw or unpasteurised milk, which is \
generally advised against during pregnancy.";

const RAW_MILK_MARKERS: [&str; 4] = [
    "raw milk",
    "unpasteurised",
    "unpasteurized",
    "lait cru",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PregnancyFacts {
    pub risks: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllergyFacts {
    pub hits: Vec<String>,
    pub allergies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngredientFacts {
    pub ingredients: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgeFacts {
    pub age_ok: bool,
    pub min_age_months: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlternativeFacts {
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecallFacts {
    pub recalls: Vec<RecallRecord>,
    pub recalls_found: usize,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NoFacts {}

/// Tool output, serialized as a flat JSON mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Pregnancy(PregnancyFacts),
    Allergy(AllergyFacts),
    Ingredients(IngredientFacts),
    Age(AgeFacts),
    Alternatives(AlternativeFacts),
    Recalls(RecallFacts),
    Empty(NoFacts),
}

impl ToolOutput {
    pub fn empty() -> Self {
        ToolOutput::Empty(NoFacts {})
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ToolOutput::Empty(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

pub fn run_tool_for_intent(intent: Intent, scan: &ScanContext) -> ToolOutput {
    match intent {
        Intent::PregnancyRisk => ToolOutput::Pregnancy(pregnancy_facts(scan)),
        Intent::AllergyQuestion => ToolOutput::Allergy(allergy_facts(scan)),
        Intent::IngredientInfo => ToolOutput::Ingredients(IngredientFacts {
            ingredients: scan.ingredients.clone(),
            notes: scan.notes.clone(),
        }),
        Intent::AgeAppropriateness => ToolOutput::Age(AgeFacts {
            age_ok: scan.min_age_months.is_some_and(|m| m <= 0),
            min_age_months: scan.min_age_months,
        }),
        Intent::AlternativeProducts => ToolOutput::Alternatives(AlternativeFacts::default()),
        Intent::RecallDetails => ToolOutput::Recalls(recall_facts(scan)),
        Intent::UnclearIntent => ToolOutput::empty(),
    }
}

/// Dispatch by intent name; unknown names yield an empty mapping.
pub fn run_tool_by_name(intent: &str, scan: &ScanContext) -> ToolOutput {
    match intent.parse::<Intent>() {
        Ok(intent) => run_tool_for_intent(intent, scan),
        Err(_) => ToolOutput::empty(),
    }
}

fn pregnancy_facts(scan: &ScanContext) -> PregnancyFacts {
    let mut facts = PregnancyFacts::default();

    let is_cheese = scan
        .category
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case("cheese"));
    if is_cheese || scan.has_flag("soft_cheese") {
        facts.risks.push(SOFT_CHEESE_RISK.to_string());
        facts.notes.push(SOFT_CHEESE_NOTE.to_string());
    }

    let raw_milk = scan.ingredients.iter().any(|ingredient| {
        let lower = ingredient.to_lowercase();
        RAW_MILK_MARKERS.iter().any(|m| lower.contains(m))
    });
    if raw_milk {
        facts.risks.push(UNPASTEURISED_DAIRY_RISK.to_string());
        facts.notes.push(RAW_MILK_NOTE.to_string());
    }

    facts
}

fn allergy_facts(scan: &ScanContext) -> AllergyFacts {
    let ingredients: Vec<String> = scan.ingredients.iter().map(|i| i.to_lowercase()).collect();
    let allergies: BTreeSet<String> = scan
        .allergies()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();

    let hits = allergies
        .iter()
        .filter(|allergy| ingredients.iter().any(|i| i.contains(allergy.as_str())))
        .cloned()
        .collect();

    AllergyFacts {
        hits,
        allergies: allergies.into_iter().collect(),
    }
}

fn recall_facts(scan: &ScanContext) -> RecallFacts {
    let notes = if scan.recalls.is_empty() {
        vec![VERIFY_LOT_NOTE.to_string()]
    } else {
        Vec::new()
    };
    RecallFacts {
        recalls: scan.recalls.clone(),
        recalls_found: scan.recalls_found,
        notes,
    }
}
