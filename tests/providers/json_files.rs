use std::{fs, path::PathBuf};

use uuid::Uuid;

use cvm_decision::{
    decision::{DecisionErrorKind, PermissionPort, ProfilePort},
    journey::build_journey,
    providers::{JsonDirectoryProfileProvider, JsonPermissionProvider},
    types::{Channel, ConsentFlag, TreatmentType},
};

struct TempDir(PathBuf);

impl TempDir {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("cvm-decision-providers-{}", Uuid::now_v7()));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        Self(dir)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.0.join(name);
        fs::write(&path, content).expect("fixture should be written");
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn seeded_dir() -> TempDir {
    let dir = TempDir::new();
    dir.write(
        "usage_data.json",
        r#"[
            {"customer_id": "U1", "date": "2024-02-10", "data_gb": 4.2},
            {"customer_id": "U2", "date": "2024-02-11", "data_gb": 1.0},
            {"customer_id": "U1", "date": "2024-01-05", "data_gb": 9.9}
        ]"#,
    );
    dir.write(
        "network_data.json",
        r#"{"data": [{"customer_id": "U1", "date": "2024-02-01", "connection_quality": "poor"}]}"#,
    );
    dir.write("notes.txt", "not a data file");
    dir.write(
        "permissions.json",
        r#"[{"customer_id": "U1", "permissions": {"sms": {"marketing": "N", "service": "Y"}}}]"#,
    );
    dir
}

#[tokio::test]
async fn given_category_files_when_fetching_profile_then_records_are_grouped_by_file_stem() {
    let dir = seeded_dir();
    let provider = JsonDirectoryProfileProvider::new(&dir.0).skip_file(dir.0.join("permissions.json"));

    let profile = provider
        .fetch_profile("U1")
        .await
        .expect("profile should load");

    assert_eq!(profile.customer_id, "U1");
    assert_eq!(
        profile.records.keys().map(String::as_str).collect::<Vec<_>>(),
        ["network_data", "usage_data"]
    );
    assert_eq!(profile.records["usage_data"].len(), 2);
    assert_eq!(profile.record_count(), 3);

    let journey = build_journey(&profile);
    let dates: Vec<&str> = journey.iter().map(|record| record.date.as_str()).collect();
    assert_eq!(dates, ["2024-01-05", "2024-02-01", "2024-02-10"]);
    assert_eq!(journey[1].category.as_deref(), Some("network_data"));
    assert_eq!(
        journey[1].attribute("connection_quality"),
        Some(&serde_json::json!("poor"))
    );
}

#[tokio::test]
async fn given_customer_without_records_when_fetching_profile_then_profile_is_empty() {
    let dir = seeded_dir();
    let provider =
        JsonDirectoryProfileProvider::new(&dir.0).skip_file(dir.0.join("permissions.json"));

    let profile = provider
        .fetch_profile("U404")
        .await
        .expect("unknown customer is not an error");

    assert!(profile.records.is_empty());
    assert!(build_journey(&profile).is_empty());
}

#[tokio::test]
async fn given_missing_directory_when_fetching_profile_then_data_unavailable() {
    let provider = JsonDirectoryProfileProvider::new(
        std::env::temp_dir().join(format!("cvm-decision-absent-{}", Uuid::now_v7())),
    );

    let err = provider
        .fetch_profile("U1")
        .await
        .expect_err("missing directory must fail");

    assert_eq!(err.kind, DecisionErrorKind::DataUnavailable);
}

#[tokio::test]
async fn given_malformed_file_when_fetching_profile_then_data_unavailable_names_the_file() {
    let dir = TempDir::new();
    dir.write("billing_data.json", "[{\"customer_id\": \"U1\", ");

    let err = JsonDirectoryProfileProvider::new(&dir.0)
        .fetch_profile("U1")
        .await
        .expect_err("malformed json must fail");

    assert_eq!(err.kind, DecisionErrorKind::DataUnavailable);
    assert!(err.message.contains("billing_data.json"));
}

#[tokio::test]
async fn given_unskipped_permissions_file_when_fetching_profile_then_it_is_read_as_a_category() {
    let dir = seeded_dir();
    let provider = JsonDirectoryProfileProvider::new(&dir.0);

    let profile = provider
        .fetch_profile("U1")
        .await
        .expect("profile should load");

    assert!(profile.records.contains_key("permissions"));
}

#[tokio::test]
async fn given_skipped_file_in_other_directory_when_fetching_then_same_named_category_is_read() {
    let dir = seeded_dir();
    let elsewhere = TempDir::new();
    let outside_permissions = elsewhere.write("permissions.json", "[]");
    let provider = JsonDirectoryProfileProvider::new(&dir.0).skip_file(outside_permissions);

    let profile = provider
        .fetch_profile("U1")
        .await
        .expect("profile should load");

    assert!(profile.records.contains_key("permissions"));
}

#[tokio::test]
async fn given_cached_provider_when_fetching_again_then_files_are_not_reread() {
    let dir = seeded_dir();
    let provider =
        JsonDirectoryProfileProvider::new(&dir.0).skip_file(dir.0.join("permissions.json"));

    let first = provider.fetch_profile("U1").await.expect("profile should load");
    dir.write(
        "usage_data.json",
        r#"[{"customer_id": "U1", "date": "2024-03-01", "data_gb": 0.5}]"#,
    );
    let second = provider.fetch_profile("U1").await.expect("profile should load");
    let other = provider.fetch_profile("U2").await.expect("profile should load");

    assert_eq!(provider.loads(), 1);
    assert_eq!(second, first);
    assert_eq!(second.records["usage_data"].len(), 2);
    assert_eq!(other.records["usage_data"].len(), 1);

    provider.clear_cache().await;
    let refreshed = provider.fetch_profile("U1").await.expect("profile should load");

    assert_eq!(provider.loads(), 2);
    assert_eq!(refreshed.records["usage_data"].len(), 1);
    assert_eq!(refreshed.records["usage_data"][0].date, "2024-03-01");
}

#[tokio::test]
async fn given_cache_disabled_when_fetching_again_then_changes_are_seen() {
    let dir = seeded_dir();
    let provider = JsonDirectoryProfileProvider::new(&dir.0)
        .skip_file(dir.0.join("permissions.json"))
        .with_cache(false);

    provider.fetch_profile("U1").await.expect("profile should load");
    dir.write("usage_data.json", "[]");
    let second = provider.fetch_profile("U1").await.expect("profile should load");

    assert_eq!(provider.loads(), 2);
    assert!(!second.records.contains_key("usage_data"));
}

#[tokio::test]
async fn given_failed_load_when_directory_appears_then_next_fetch_retries() {
    let dir = TempDir::new();
    let profile_dir = dir.0.join("profiles");
    let provider = JsonDirectoryProfileProvider::new(&profile_dir);

    provider
        .fetch_profile("U1")
        .await
        .expect_err("missing directory must fail");
    fs::create_dir_all(&profile_dir).expect("profile dir should be created");
    fs::write(
        profile_dir.join("billing_data.json"),
        r#"[{"customer_id": "U1", "date": "2024-02-01", "amount": 30}]"#,
    )
    .expect("fixture should be written");

    let profile = provider
        .fetch_profile("U1")
        .await
        .expect("failed loads are not cached");

    assert_eq!(profile.record_count(), 1);
}

#[tokio::test]
async fn given_permissions_file_when_loading_then_alias_and_lookups_work() {
    let dir = seeded_dir();
    let provider = JsonPermissionProvider::load(dir.0.join("permissions.json"))
        .await
        .expect("permissions should load");

    assert_eq!(provider.len(), 1);
    let matrix = provider
        .fetch_permissions("U1")
        .await
        .expect("lookup never fails")
        .expect("U1 has a matrix");
    assert_eq!(
        matrix.consent(Channel::Sms, TreatmentType::Marketing),
        Some(ConsentFlag::No)
    );
    assert!(
        provider
            .fetch_permissions("U2")
            .await
            .expect("lookup never fails")
            .is_none()
    );
}

#[tokio::test]
async fn given_unexpected_consent_value_when_loading_then_other_matrices_survive() {
    let dir = TempDir::new();
    let path = dir.write(
        "permissions.json",
        r#"[
            {"customer_id": "U1", "permissions": {"sms": {"marketing": "Y"}}},
            {"customer_id": "U2", "permissions": {"sms": {"marketing": "y", "service": ""}}}
        ]"#,
    );

    let provider = JsonPermissionProvider::load(&path)
        .await
        .expect("odd flags must not reject the file");

    assert_eq!(provider.len(), 2);
    let u1 = provider
        .fetch_permissions("U1")
        .await
        .expect("lookup never fails")
        .expect("U1 has a matrix");
    assert_eq!(
        u1.consent(Channel::Sms, TreatmentType::Marketing),
        Some(ConsentFlag::Yes)
    );
    let u2 = provider
        .fetch_permissions("U2")
        .await
        .expect("lookup never fails")
        .expect("U2 has a matrix");
    assert_eq!(
        u2.consent(Channel::Sms, TreatmentType::Marketing),
        Some(ConsentFlag::Unrecognized)
    );
    assert_eq!(
        u2.consent(Channel::Sms, TreatmentType::Service),
        Some(ConsentFlag::Unrecognized)
    );
}

#[tokio::test]
async fn given_missing_permissions_file_when_loading_then_provider_is_empty() {
    let dir = TempDir::new();

    let provider = JsonPermissionProvider::load(dir.0.join("permissions.json"))
        .await
        .expect("missing file is not an error");

    assert!(provider.is_empty());
    assert!(
        provider
            .fetch_permissions("U1")
            .await
            .expect("lookup never fails")
            .is_none()
    );
}

#[tokio::test]
async fn given_malformed_permissions_file_when_loading_then_data_unavailable() {
    let dir = TempDir::new();
    let path = dir.write("permissions.json", r#"{"customer_id": "U1"}"#);

    let err = JsonPermissionProvider::load(&path)
        .await
        .expect_err("object instead of array must fail");

    assert_eq!(err.kind, DecisionErrorKind::DataUnavailable);
}
