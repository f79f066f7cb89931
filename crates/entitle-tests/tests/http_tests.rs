//! End-to-end runs of an on-disk context against a mock license server.
//!
//! Run with: `cargo test -p entitle-tests --test http_tests`

use entitle_core::config::{CloudConfig, LicensingConfig};
use entitle_core::ports::LicenseStore;
use entitle_core::validation::{ValidationSource, ValidationStatus};
use entitle_licensing::{ActivationStatus, LicensingContext, StartupAction};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "ENT-2025-HTTP-0001";

fn grant_json() -> serde_json::Value {
    serde_json::json!({
        "license_key": KEY,
        "customer_email": "buyer@example.com",
        "product_type": "personal_1y",
        "features": ["export"],
        "status": "active",
        "expires_at": "2031-01-01T00:00:00Z"
    })
}

async fn license_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn config(dir: &tempfile::TempDir, server: &MockServer) -> LicensingConfig {
    let db_path = dir.path().join("entitle.db");
    LicensingConfig::default()
        .with_database_url(format!("sqlite://{}", db_path.display()))
        .with_cloud(
            CloudConfig::new(server.uri())
                .with_timeouts(Duration::from_millis(500), Duration::from_millis(500))
                .with_retries(1, Duration::from_millis(10)),
        )
}

#[tokio::test]
async fn test_validate_then_reopen_offline() {
    entitle_tests::init_test_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let server = license_server().await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .and(body_partial_json(serde_json::json!({ "license_key": KEY })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "valid": true, "data": grant_json() })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let context = LicensingContext::open(config(&dir, &server))
        .await
        .expect("Failed to open context");
    let first = context.validate(KEY, false, false).await;
    assert!(first.valid);
    assert_eq!(first.validation_source, ValidationSource::Cloud);
    context.close().await;

    // Reopen against a dead server: the cached row answers.
    let offline = config(&dir, &server).with_cloud(
        CloudConfig::new("http://127.0.0.1:1")
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
            .with_retries(0, Duration::from_millis(10)),
    );
    let context = LicensingContext::open(offline)
        .await
        .expect("Failed to reopen context");
    let second = context.validate(KEY, false, false).await;
    assert!(second.valid);
    assert_eq!(second.status, ValidationStatus::Valid);
    assert_eq!(second.validation_source, ValidationSource::DatabaseOnly);

    let decision = context.startup().await;
    assert_eq!(decision.action, StartupAction::Continue);
    assert!(!decision.online);
    context.close().await;
}

#[tokio::test]
async fn test_activate_against_license_server() {
    entitle_tests::init_test_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let server = license_server().await;
    Mock::given(method("POST"))
        .and(path("/licenses/check-activation"))
        .and(body_partial_json(serde_json::json!({ "license_key": KEY })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "can_activate": true,
            "reason": "new_activation",
            "license_data": grant_json()
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/licenses/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let context = LicensingContext::open(config(&dir, &server))
        .await
        .expect("Failed to open context");
    let outcome = context.activate(KEY, false).await;

    assert_eq!(outcome.activation_status, ActivationStatus::Activated);
    let license = outcome.data.expect("Activation returned no license");
    assert_eq!(license.customer_email, "buyer@example.com");
    let active = context
        .store()
        .active_activations(license.id)
        .await
        .expect("Failed to list activations");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].machine_fingerprint, context.identity().fingerprint());
    context.close().await;
}
