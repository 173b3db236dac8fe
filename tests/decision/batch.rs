use std::{sync::Arc, time::Duration};

use cvm_decision::{
    decision::{BatchRunner, DecisionErrorKind, DecisionMode, DecisionStatus},
    providers::InMemoryProfileProvider,
    types::CustomerProfile,
};

use crate::support::{
    Harness, ScriptedOracle, TestProfiles, fast_limits, granted_everything, u1_profile,
};

fn customers(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn harness_with_customers(ids: &[&str]) -> Harness {
    let harness = Harness::new();
    for id in ids {
        harness.profiles.insert(CustomerProfile::new(*id));
        harness.permissions.insert(granted_everything(id));
    }
    harness
}

#[tokio::test]
async fn given_middle_profile_failure_when_running_batch_then_results_keep_input_order() {
    let harness = harness_with_customers(&["U3"]);
    let profiles = Arc::new(
        InMemoryProfileProvider::new()
            .with_profile(u1_profile())
            .with_profile(CustomerProfile::new("U3"))
            .with_unavailable("U2", "billing store offline"),
    );
    let oracle = Arc::new(ScriptedOracle::new());
    let orchestrator =
        Arc::new(harness.orchestrator_with_profiles(profiles, oracle, fast_limits()));
    let runner = BatchRunner::new(orchestrator, 4);

    let results = runner
        .run(&customers(&["U1", "U2", "U3"]), &DecisionMode::default())
        .await;

    let ids: Vec<&str> = results.iter().map(|r| r.customer_id.as_str()).collect();
    let statuses: Vec<DecisionStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(ids, ["U1", "U2", "U3"]);
    assert_eq!(
        statuses,
        [
            DecisionStatus::Success,
            DecisionStatus::Error,
            DecisionStatus::Success
        ]
    );
    assert_eq!(results[1].error_kind, Some(DecisionErrorKind::DataUnavailable));
}

#[tokio::test]
async fn given_panicking_customer_when_running_batch_then_only_that_customer_fails() {
    let harness = harness_with_customers(&["A", "B", "C"]);
    let profiles = Arc::new(
        TestProfiles::new(InMemoryProfileProvider::new()).panic_for("B"),
    );
    let orchestrator = Arc::new(harness.orchestrator_with_profiles(
        profiles,
        Arc::new(ScriptedOracle::new()),
        fast_limits(),
    ));
    let runner = BatchRunner::new(orchestrator, 2);

    let results = runner
        .run(&customers(&["A", "B", "C"]), &DecisionMode::default())
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_success());
    assert_eq!(results[1].customer_id, "B");
    assert_eq!(results[1].error_kind, Some(DecisionErrorKind::Internal));
    assert_eq!(results[1].timestamp, "2024-03-01T10:00:00Z");
    assert!(results[2].is_success());
}

#[tokio::test]
async fn given_slow_early_customers_when_running_batch_then_order_follows_input() {
    let harness = harness_with_customers(&["A", "B", "C", "D"]);
    let profiles = Arc::new(
        TestProfiles::new(InMemoryProfileProvider::new())
            .delay("A", Duration::from_millis(120))
            .delay("B", Duration::from_millis(60)),
    );
    let orchestrator = Arc::new(harness.orchestrator_with_profiles(
        profiles,
        Arc::new(ScriptedOracle::new()),
        fast_limits(),
    ));
    let runner = BatchRunner::new(orchestrator, 4);

    let results = runner
        .run(&customers(&["A", "B", "C", "D"]), &DecisionMode::default())
        .await;

    let ids: Vec<&str> = results.iter().map(|r| r.customer_id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C", "D"]);
    assert!(results.iter().all(|result| result.is_success()));
}

#[tokio::test]
async fn given_concurrency_limit_when_running_batch_then_in_flight_work_never_exceeds_it() {
    let ids = ["C1", "C2", "C3", "C4", "C5", "C6", "C7", "C8"];
    let harness = harness_with_customers(&ids);
    let mut profiles = TestProfiles::new(InMemoryProfileProvider::new());
    for id in ids {
        profiles = profiles.delay(id, Duration::from_millis(30));
    }
    let profiles = Arc::new(profiles);
    let orchestrator = Arc::new(harness.orchestrator_with_profiles(
        profiles.clone(),
        Arc::new(ScriptedOracle::new()),
        fast_limits(),
    ));
    let runner = BatchRunner::new(orchestrator, 2);
    assert_eq!(runner.max_concurrency(), 2);

    let results = runner.run(&customers(&ids), &DecisionMode::default()).await;

    assert_eq!(results.len(), ids.len());
    assert!(profiles.peak() <= 2, "peak in flight was {}", profiles.peak());
}

#[tokio::test]
async fn given_directed_batch_beyond_capacity_when_running_then_exactly_capacity_succeed() {
    let ids = ["D1", "D2", "D3", "D4", "D5"];
    let harness = harness_with_customers(&ids);
    let orchestrator = Arc::new(harness.orchestrator(Arc::new(ScriptedOracle::new()), fast_limits()));
    let runner = BatchRunner::new(orchestrator, 5);

    let results = runner
        .run(
            &customers(&ids),
            &DecisionMode::Directed {
                treatment_id: "call_back".to_string(),
            },
        )
        .await;

    let succeeded = results.iter().filter(|result| result.is_success()).count();
    let exhausted = results
        .iter()
        .filter(|result| result.error_kind == Some(DecisionErrorKind::CapacityExhausted))
        .count();
    assert_eq!(succeeded, 2);
    assert_eq!(exhausted, 3);
    assert_eq!(harness.remaining("call_back"), Some(0));
    harness.ledger.verify_invariants().expect("invariants hold");
}

#[tokio::test]
async fn given_zero_concurrency_when_building_runner_then_one_slot_is_used() {
    let harness = Harness::new();
    let orchestrator = Arc::new(harness.orchestrator(Arc::new(ScriptedOracle::new()), fast_limits()));
    let runner = BatchRunner::new(orchestrator, 0);
    assert_eq!(runner.max_concurrency(), 1);

    let results = runner.run(&[], &DecisionMode::default()).await;
    assert!(results.is_empty());
}
