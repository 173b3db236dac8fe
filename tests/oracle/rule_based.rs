use std::collections::BTreeMap;

use serde_json::json;

use cvm_decision::{
    decision::{AlternativeRequest, OraclePort, RecommendationRequest},
    ledger::LedgerEntry,
    oracle::RuleBasedOracle,
    types::{EventRecord, PermissionMatrix, Treatment},
};

fn request(journey: Vec<EventRecord>, offered: &[&str]) -> RecommendationRequest {
    let treatments: BTreeMap<String, Treatment> = offered
        .iter()
        .map(|id| (id.to_string(), Treatment::new(*id, "")))
        .collect();
    RecommendationRequest {
        customer_id: "U1".to_string(),
        journey,
        treatments,
        constraints: BTreeMap::new(),
        permissions: PermissionMatrix::empty("U1"),
    }
}

fn churn(date: &str, probability: f64) -> EventRecord {
    EventRecord::new("U1", date).with_attribute("churn_probability", json!(probability))
}

fn network(date: &str, quality: &str) -> EventRecord {
    EventRecord::new("U1", date).with_attribute("connection_quality", json!(quality))
}

const ALL: &[&str] = &["call_back", "service_sms", "loyalty_app", "ignore"];

#[tokio::test]
async fn given_high_churn_when_recommending_then_call_back_is_chosen() {
    let oracle = RuleBasedOracle::default();

    let answer = oracle
        .recommend(request(vec![churn("2024-03-01", 0.85)], ALL))
        .await
        .expect("rule oracle never fails");

    assert_eq!(answer.selected_treatment, "call_back");
    assert!(answer.explanation.contains("0.85"));
}

#[tokio::test]
async fn given_churn_falling_below_threshold_when_recommending_then_latest_score_is_used() {
    let oracle = RuleBasedOracle::default();
    let journey = vec![churn("2024-01-01", 0.9), churn("2024-03-01", 0.2)];

    let answer = oracle
        .recommend(request(journey, ALL))
        .await
        .expect("rule oracle never fails");

    assert_eq!(answer.selected_treatment, "loyalty_app");
}

#[tokio::test]
async fn given_poor_connection_when_recommending_then_service_sms_is_chosen() {
    let oracle = RuleBasedOracle::default();
    let journey = vec![churn("2024-02-01", 0.3), network("2024-02-10", "poor")];

    let answer = oracle
        .recommend(request(journey, ALL))
        .await
        .expect("rule oracle never fails");

    assert_eq!(answer.selected_treatment, "service_sms");
}

#[tokio::test]
async fn given_rule_target_not_offered_when_recommending_then_next_rule_applies() {
    let oracle = RuleBasedOracle::new(0.5);
    let journey = vec![churn("2024-02-01", 0.7), network("2024-02-10", "poor")];

    let answer = oracle
        .recommend(request(journey.clone(), &["service_sms", "ignore"]))
        .await
        .expect("rule oracle never fails");
    assert_eq!(answer.selected_treatment, "service_sms");

    let answer = oracle
        .recommend(request(journey, &["ignore"]))
        .await
        .expect("rule oracle never fails");
    assert_eq!(answer.selected_treatment, "ignore");
}

#[tokio::test]
async fn given_empty_journey_when_recommending_then_ignore_is_chosen() {
    let oracle = RuleBasedOracle::default();

    let answer = oracle
        .recommend(request(vec![], ALL))
        .await
        .expect("rule oracle never fails");

    assert_eq!(answer.selected_treatment, "ignore");
}

#[tokio::test]
async fn given_ranked_candidates_when_finding_alternative_then_lowest_priority_wins() {
    let oracle = RuleBasedOracle::default();
    let mut context = request(
        vec![churn("2024-03-01", 0.1)],
        &["call_back", "service_sms", "loyalty_app", "retention_email", "ignore"],
    );
    context.constraints = [
        LedgerEntry::new("call_back", 2).with_priority(1),
        LedgerEntry::new("service_sms", 5).with_priority(2),
        LedgerEntry::new("loyalty_app", 5).with_priority(2),
    ]
    .into_iter()
    .map(|entry| (entry.treatment_id.clone(), entry))
    .collect();

    let answer = oracle
        .find_alternative(AlternativeRequest {
            context,
            excluded_treatment: "call_back".to_string(),
        })
        .await
        .expect("rule oracle never fails");

    assert_eq!(answer.selected_treatment, "loyalty_app");
    assert!(answer.explanation.contains("call_back"));
}

#[tokio::test]
async fn given_only_excluded_candidate_when_finding_alternative_then_ignore_is_chosen() {
    let oracle = RuleBasedOracle::default();

    let answer = oracle
        .find_alternative(AlternativeRequest {
            context: request(vec![], &["call_back", "ignore"]),
            excluded_treatment: "call_back".to_string(),
        })
        .await
        .expect("rule oracle never fails");

    assert_eq!(answer.selected_treatment, "ignore");
}
