use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    ledger::LedgerEntry,
    types::{Channel, Treatment, TreatmentType, display_name_from_id},
};

pub const DEFAULT_CUSTOM_MAX_PER_DAY: u32 = 100;
pub const DEFAULT_CUSTOM_COST: f64 = 1.0;
pub const DEFAULT_CUSTOM_PRIORITY: i32 = 10;

const ID_SLUG_CHARS: usize = 20;

static DISPLAY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"|'([^']+)'|\[([^\]]+)\]"#).expect("display name pattern is valid")
});
static MAX_PER_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(max|limit)\D*(\d+)").expect("max pattern is valid")
});
static COST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(cost|price)\D*(\d+(?:\.\d+)?)").expect("cost pattern is valid")
});
static PRIORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(priority|importance)\D*(\d+)").expect("priority pattern is valid")
});

/// A custom treatment and the ledger entry that gives it capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTreatment {
    pub treatment: Treatment,
    pub constraint: LedgerEntry,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredTreatment {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    channel: Option<Channel>,
    #[serde(default, rename = "type")]
    treatment_type: Option<TreatmentType>,
    #[serde(default)]
    constraints: StructuredConstraints,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredConstraints {
    #[serde(default)]
    max_per_day: Option<u32>,
    #[serde(default)]
    remaining_availability: Option<u32>,
    #[serde(default, alias = "cost_per_contact")]
    cost_per_contact_pounds: Option<f64>,
    #[serde(default)]
    priority: Option<i32>,
}

/// `custom_<slug of the first 20 chars>_<8 hex chars>`
pub fn generate_custom_id(text: &str) -> String {
    let slug: String = text
        .chars()
        .take(ID_SLUG_CHARS)
        .flat_map(char::to_lowercase)
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("custom_{}_{}", slug, &suffix[..8])
}

/// Turns a free-text or JSON description into a custom treatment.
///
/// Input that looks like a JSON object is read as structured fields; if it fails to parse, the
/// whole text is kept as the description. Free text contributes a quoted or bracketed display name
/// and `max|limit N`, `cost|price X`, `priority|importance N` constraints. Anything not found keeps
/// the custom defaults.
pub fn parse_treatment_text(text: &str, treatment_id: Option<&str>) -> ParsedTreatment {
    let id = match treatment_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => generate_custom_id(text),
    };

    let mut treatment = Treatment::new(id.clone(), text);
    treatment.display_name = display_name_from_id(&id);
    treatment.is_custom = true;
    let mut constraint = LedgerEntry::new(id, DEFAULT_CUSTOM_MAX_PER_DAY)
        .with_cost(DEFAULT_CUSTOM_COST)
        .with_priority(DEFAULT_CUSTOM_PRIORITY);

    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        match serde_json::from_str::<StructuredTreatment>(trimmed) {
            Ok(structured) => apply_structured(&mut treatment, &mut constraint, structured),
            Err(err) => {
                tracing::warn!(
                    target: "treatments",
                    error = %err,
                    "custom_treatment_json_unparsed"
                );
            }
        }
    } else {
        apply_free_text(&mut treatment, &mut constraint, text);
    }

    ParsedTreatment {
        treatment,
        constraint,
    }
}

fn apply_structured(
    treatment: &mut Treatment,
    constraint: &mut LedgerEntry,
    structured: StructuredTreatment,
) {
    if let Some(description) = structured.description {
        treatment.description = description;
    }
    if let Some(display_name) = structured.display_name {
        treatment.display_name = display_name;
    }
    if let Some(enabled) = structured.enabled {
        treatment.enabled = enabled;
    }
    treatment.channel = structured.channel;
    treatment.treatment_type = structured.treatment_type;

    let limits = structured.constraints;
    if let Some(max_per_day) = limits.max_per_day {
        constraint.max_per_day = max_per_day;
        constraint.remaining_availability = max_per_day;
    }
    if let Some(remaining) = limits.remaining_availability {
        constraint.remaining_availability = remaining.min(constraint.max_per_day);
    }
    if let Some(cost) = limits.cost_per_contact_pounds {
        constraint.cost_per_contact = cost;
    }
    if let Some(priority) = limits.priority {
        constraint.priority = priority;
    }
}

fn apply_free_text(treatment: &mut Treatment, constraint: &mut LedgerEntry, text: &str) {
    if let Some(name) = DISPLAY_NAME
        .captures(text)
        .and_then(|caps| caps.iter().skip(1).flatten().next())
    {
        treatment.display_name = name.as_str().to_string();
    }
    if let Some(max_per_day) = captured_number::<u32>(&MAX_PER_DAY, text) {
        constraint.max_per_day = max_per_day;
        constraint.remaining_availability = max_per_day;
    }
    if let Some(cost) = captured_number::<f64>(&COST, text) {
        constraint.cost_per_contact = cost;
    }
    if let Some(priority) = captured_number::<i32>(&PRIORITY, text) {
        constraint.priority = priority;
    }
}

fn captured_number<T: std::str::FromStr>(pattern: &Regex, text: &str) -> Option<T> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(2))
        .and_then(|value| value.as_str().parse().ok())
}
