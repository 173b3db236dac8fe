use serde_json::Value;

use crate::{
    decision::{
        error::{DecisionError, oracle_failure},
        ports::{AlternativeRequest, Recommendation, RecommendationRequest},
    },
    types::{ConsentFlag, PermissionMatrix},
};

pub const SYSTEM_PROMPT: &str = "You are a customer value management specialist for a telecom \
operator. You choose exactly one outreach treatment per customer and answer only with JSON.";

const BUSINESS_RULES: &str = "\
IMPORTANT BUSINESS RULES:
1. Do not recommend treatments that violate the customer's contact permissions.
2. If a channel's marketing permission is not allowed, do not use that channel for marketing.
3. If a channel's service permission is not allowed, do not use that channel for service messages.
4. Respect the customer's preferred contact time, do-not-disturb window and language.
5. Only choose from the treatments listed below, or \"ignore\" to take no action.";

const RESPONSE_FORMAT: &str = "\
Respond with a JSON object of exactly this shape:
{\"selected_treatment\": \"<treatment id or ignore>\", \"explanation\": \"<why, including how it respects the permissions>\"}";

/// Contact rules in prose. A missing matrix is spelled out as fully restricted.
pub fn permission_rules(matrix: &PermissionMatrix) -> String {
    if matrix.is_empty() {
        return "WARNING: Customer permissions not found. Assume all channels are restricted."
            .to_string();
    }

    let mut rules = vec!["Contact Permission Rules:".to_string()];
    for (channel, consent) in &matrix.channels {
        rules.push(format!("\n{} Channel:", channel.to_uppercase()));
        rules.push(format!("- marketing: {}", consent_text(consent.marketing)));
        rules.push(format!("- service: {}", consent_text(consent.service)));
    }
    rules.push("\nContact Time Preferences:".to_string());
    rules.push(format!(
        "- Preferred time: {}",
        matrix.preferred_contact_time.as_deref().unwrap_or("unknown")
    ));
    rules.push(format!(
        "- Do not disturb: {}",
        matrix.do_not_disturb.as_deref().unwrap_or("unknown")
    ));
    rules.push(format!(
        "- Preferred language: {}",
        matrix.preferred_language.as_deref().unwrap_or("unknown")
    ));
    rules.join("\n")
}

fn consent_text(flag: Option<ConsentFlag>) -> &'static str {
    match flag {
        Some(ConsentFlag::Yes) => "allowed",
        Some(ConsentFlag::No | ConsentFlag::Unrecognized) | None => "not allowed",
    }
}

pub fn recommendation_prompt(req: &RecommendationRequest) -> String {
    format!(
        "Based on this customer's journey:\n{}\n\n{}\n\n{}\n\n\
         Which treatment best improves this customer's lifetime value?\n\n\
         Available treatments: {}\nCurrent constraints: {}\n\n{}",
        to_pretty_json(&req.journey),
        permission_rules(&req.permissions),
        BUSINESS_RULES,
        to_pretty_json(&req.treatments),
        to_pretty_json(&req.constraints),
        RESPONSE_FORMAT,
    )
}

pub fn alternative_prompt(req: &AlternativeRequest) -> String {
    format!(
        "The preferred treatment for this customer is not available: {}\n\n{}\n\n\
         Choose the best alternative. You must not select {}. If no compliant treatment \
         remains, select \"ignore\".",
        req.excluded_treatment,
        recommendation_prompt(&req.context),
        req.excluded_treatment,
    )
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Reads `{selected_treatment, explanation}` out of a model reply, tolerating code fences and
/// surrounding prose.
pub fn parse_recommendation(content: &str) -> Result<Recommendation, DecisionError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(oracle_failure(
                "model reply does not contain a JSON object",
            ));
        }
    };

    let value: Value = serde_json::from_str(object)
        .map_err(|err| oracle_failure(format!("model reply is not valid JSON: {}", err)))?;
    let selected = value
        .get("selected_treatment")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|selected| !selected.is_empty())
        .ok_or_else(|| oracle_failure("model reply is missing selected_treatment"))?;
    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(Recommendation::new(selected, explanation))
}
