//! Single-device activation scenarios.
//!
//! Run with: `cargo test -p entitle-tests --test activation_tests`

use entitle_core::activation::fingerprint_hint;
use entitle_core::ports::LicenseStore;
use entitle_core::validation::ValidationSource;
use entitle_licensing::ActivationStatus;
use entitle_tests::{
    context::TestContext,
    fixtures::{LicenseFixture, MachineFixture, PAID_KEY},
};
use pretty_assertions::assert_eq;

async fn license_id(ctx: &TestContext, key: &str) -> entitle_core::ids::LicenseId {
    ctx.store
        .get_license_by_key(key)
        .await
        .expect("Failed to read license")
        .expect("License not found")
        .id
}

#[tokio::test]
async fn test_online_activation_binds_machine() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.remote.issue(LicenseFixture::paid(PAID_KEY));
    let licensing = ctx.licensing("desk-1");

    let outcome = licensing.activate(PAID_KEY, false).await;

    assert!(outcome.success);
    assert!(outcome.valid);
    assert_eq!(outcome.activation_status, ActivationStatus::Activated);
    assert_eq!(outcome.validation_source, ValidationSource::Cloud);
    let license = outcome.data.expect("Activation returned no license");
    assert!(license.activated_at.is_some());
    assert!(license.last_validated_at.is_some());

    assert_eq!(
        ctx.remote.holder(PAID_KEY).as_deref(),
        Some(licensing.identity().fingerprint())
    );
    let active = ctx
        .store
        .active_activations(license.id)
        .await
        .expect("Failed to list activations");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].device_info["hostname"], "desk-1");
    assert_eq!(active[0].validation_source(), Some(ValidationSource::Cloud));
}

#[tokio::test]
async fn test_repeat_activation_on_same_machine() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.remote.issue(LicenseFixture::paid(PAID_KEY));
    let licensing = ctx.licensing("desk-1");

    let first = licensing.activate(PAID_KEY, false).await;
    assert_eq!(first.activation_status, ActivationStatus::Activated);

    for _ in 0..2 {
        let again = licensing.activate(PAID_KEY, false).await;
        assert!(again.success);
        assert_eq!(
            again.activation_status,
            ActivationStatus::AlreadyActivatedThisMachine
        );
    }

    let id = license_id(&ctx, PAID_KEY).await;
    let active = ctx
        .store
        .active_activations(id)
        .await
        .expect("Failed to list activations");
    assert_eq!(active.len(), 1);
    assert_eq!(ctx.remote.calls().record_activation, 1);
}

#[tokio::test]
async fn test_second_machine_is_refused_online() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.remote.issue(LicenseFixture::paid(PAID_KEY));
    let first = ctx.licensing("desk-1");
    assert!(first.activate(PAID_KEY, false).await.success);

    let other = ctx.second_machine().await.expect("Failed to create machine");
    let outcome = other.licensing("desk-2").activate(PAID_KEY, false).await;

    assert!(!outcome.success);
    assert!(!outcome.retryable);
    assert_eq!(outcome.activation_status, ActivationStatus::ActivatedElsewhere);
    let existing = outcome.existing_activation.expect("Holder not reported");
    assert_eq!(
        existing.fingerprint_hint,
        fingerprint_hint(first.identity().fingerprint())
    );
    assert!(existing.activated_at.is_some());
    assert_eq!(
        ctx.remote.holder(PAID_KEY).as_deref(),
        Some(first.identity().fingerprint())
    );
}

#[tokio::test]
async fn test_second_machine_is_refused_offline() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.seed(LicenseFixture::paid(PAID_KEY)).await.expect("Failed to seed");
    ctx.remote.set_online(false);

    let first = ctx.licensing("desk-1").activate(PAID_KEY, false).await;
    assert_eq!(first.activation_status, ActivationStatus::Activated);
    assert_eq!(first.validation_source, ValidationSource::DatabaseOnly);

    let second = ctx.licensing("desk-2").activate(PAID_KEY, false).await;
    assert_eq!(second.activation_status, ActivationStatus::ActivatedElsewhere);
    let existing = second.existing_activation.expect("Holder not reported");
    assert_eq!(
        existing.fingerprint_hint,
        fingerprint_hint(MachineFixture::identity("desk-1").fingerprint())
    );
    assert_eq!(existing.device_info["hostname"], "desk-1");

    let id = license_id(&ctx, PAID_KEY).await;
    let active = ctx
        .store
        .active_activations(id)
        .await
        .expect("Failed to list activations");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].validation_source(), Some(ValidationSource::DatabaseOnly));
}

#[tokio::test]
async fn test_forced_offline_reactivation() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.seed(LicenseFixture::paid(PAID_KEY)).await.expect("Failed to seed");
    let licensing = ctx.licensing("desk-1");

    let first = licensing.activate(PAID_KEY, true).await;
    let second = licensing.activate(PAID_KEY, true).await;

    assert_eq!(first.activation_status, ActivationStatus::Activated);
    assert_eq!(
        second.activation_status,
        ActivationStatus::AlreadyActivatedThisMachine
    );
    assert_eq!(ctx.remote.calls().probe, 0);
    assert_eq!(ctx.remote.calls().network_calls(), 0);
}

#[tokio::test]
async fn test_offline_without_cached_license() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let licensing = ctx.licensing("desk-1");

    let forced = licensing.activate(PAID_KEY, true).await;
    assert_eq!(forced.activation_status, ActivationStatus::LicenseNotFound);
    assert!(!forced.retryable);

    ctx.remote.set_online(false);
    let unreachable = licensing.activate(PAID_KEY, false).await;
    assert_eq!(
        unreachable.activation_status,
        ActivationStatus::NetworkUnavailable
    );
    assert!(unreachable.retryable);
    assert_eq!(unreachable.validation_source, ValidationSource::Offline);
}

#[tokio::test]
async fn test_placeholder_key_is_rejected_before_network() {
    let ctx = TestContext::new().await.expect("Failed to create context");

    let outcome = ctx.licensing("desk-1").activate("test-key-000000", false).await;

    assert_eq!(outcome.activation_status, ActivationStatus::InvalidKey);
    assert!(outcome.error.is_some());
    assert_eq!(ctx.remote.calls().probe, 0);
}

#[tokio::test]
async fn test_server_refusals_map_to_statuses() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.remote.issue(LicenseFixture::expired("ENT-2024-OLD-0001", 5));
    ctx.remote.issue(LicenseFixture::suspended("ENT-2025-SUSP-0001"));
    let licensing = ctx.licensing("desk-1");

    let expired = licensing.activate("ENT-2024-OLD-0001", false).await;
    assert_eq!(expired.activation_status, ActivationStatus::LicenseExpired);
    assert_eq!(expired.validation_source, ValidationSource::Cloud);

    let suspended = licensing.activate("ENT-2025-SUSP-0001", false).await;
    assert_eq!(suspended.activation_status, ActivationStatus::LicenseInactive);

    let unknown = licensing.activate("ENT-2025-NONE-0001", false).await;
    assert_eq!(unknown.activation_status, ActivationStatus::LicenseNotFound);

    assert_eq!(ctx.remote.calls().record_activation, 0);
}

#[tokio::test]
async fn test_offline_refuses_expired_local_license() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.seed_local(&LicenseFixture::expired(PAID_KEY, 2))
        .await
        .expect("Failed to seed");

    let outcome = ctx.licensing("desk-1").activate(PAID_KEY, true).await;

    assert_eq!(outcome.activation_status, ActivationStatus::LicenseExpired);
    assert!(outcome.error.unwrap().contains("2 day(s)"));
}

#[tokio::test]
async fn test_cloud_releases_stale_local_activation() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    ctx.seed(LicenseFixture::paid(PAID_KEY)).await.expect("Failed to seed");

    // desk-1 bound offline; the server never heard of it.
    let offline = ctx.licensing("desk-1").activate(PAID_KEY, true).await;
    assert!(offline.success);

    let desk_2 = ctx.licensing("desk-2");
    let outcome = desk_2.activate(PAID_KEY, false).await;
    assert_eq!(outcome.activation_status, ActivationStatus::Activated);

    let id = license_id(&ctx, PAID_KEY).await;
    let active = ctx
        .store
        .active_activations(id)
        .await
        .expect("Failed to list activations");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].machine_fingerprint, desk_2.identity().fingerprint());
}

#[tokio::test]
async fn test_fingerprint_is_stable() {
    let ctx = TestContext::new().await.expect("Failed to create context");

    let a = ctx.licensing("desk-1");
    let b = ctx.licensing("desk-1");
    let c = ctx.licensing("desk-2");

    assert_eq!(a.identity().fingerprint(), b.identity().fingerprint());
    assert_ne!(a.identity().fingerprint(), c.identity().fingerprint());
    assert_eq!(a.identity().fingerprint().len(), 32);
    assert_eq!(a.activation().fingerprint(), a.identity().fingerprint());
}
