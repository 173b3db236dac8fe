use crate::types::{Channel, Treatment, TreatmentType};

const EMAIL_KEYWORDS: &[&str] = &["email", "mail"];
const SMS_KEYWORDS: &[&str] = &["sms", "text"];
const CALL_KEYWORDS: &[&str] = &["call", "phone"];
const MARKETING_KEYWORDS: &[&str] = &["offer", "promotion", "discount", "marketing"];
const SERVICE_KEYWORDS: &[&str] = &["service", "support", "help"];

/// Explicit fields win; keyword heuristics on id and description fill the gaps.
pub fn classification(treatment: &Treatment) -> (Option<Channel>, Option<TreatmentType>) {
    let haystack = keyword_haystack(treatment);
    (
        treatment.channel.or_else(|| infer_channel(&haystack)),
        treatment
            .treatment_type
            .or_else(|| infer_treatment_type(&haystack)),
    )
}

/// Resolves and caches the classification on the record.
pub fn classify_in_place(treatment: &mut Treatment) {
    let (channel, treatment_type) = classification(treatment);
    treatment.channel = channel;
    treatment.treatment_type = treatment_type;
}

fn keyword_haystack(treatment: &Treatment) -> String {
    format!("{} {}", treatment.id, treatment.description).to_lowercase()
}

fn infer_channel(haystack: &str) -> Option<Channel> {
    if contains_any(haystack, EMAIL_KEYWORDS) {
        Some(Channel::Email)
    } else if contains_any(haystack, SMS_KEYWORDS) {
        Some(Channel::Sms)
    } else if contains_any(haystack, CALL_KEYWORDS) {
        Some(Channel::Call)
    } else {
        None
    }
}

fn infer_treatment_type(haystack: &str) -> Option<TreatmentType> {
    if contains_any(haystack, MARKETING_KEYWORDS) {
        Some(TreatmentType::Marketing)
    } else if contains_any(haystack, SERVICE_KEYWORDS) {
        Some(TreatmentType::Service)
    } else {
        None
    }
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}
