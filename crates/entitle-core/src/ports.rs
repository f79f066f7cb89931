//! Port traits.
//!
//! These traits define the interfaces between the licensing components and
//! their adapters (SQLite store, HTTP authority, test fakes).

use crate::Result;
use crate::activation::Activation;
use crate::ids::{ActivationId, LicenseId};
use crate::license::{ExpiryCheck, IntegrityReport, License, LicenseGrant, LicenseStatistics};
use crate::remote::{ActivationCheck, RemoteError, RemoteValidation, TrialEligibility, TrialGrant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Local persistence for licenses and their activations.
///
/// Every method is one logical operation; implementations commit writes
/// before returning.
#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Insert a new license. Fails on blank required fields or a duplicate key.
    async fn create_license(&self, grant: &LicenseGrant) -> Result<LicenseId>;

    /// Insert or update a license from authoritative remote data.
    async fn sync_license(&self, grant: &LicenseGrant) -> Result<LicenseId>;

    async fn get_license_by_key(&self, key: &str) -> Result<Option<License>>;

    /// Newest `active`, unexpired license.
    async fn get_active_license(&self) -> Result<Option<License>>;

    /// Newest `active`, unexpired license that is not a trial.
    async fn get_active_paid_license(&self) -> Result<Option<License>>;

    /// Newest license of any status.
    async fn get_latest_license(&self) -> Result<Option<License>>;

    /// Newest trial license of any status.
    async fn get_latest_trial(&self) -> Result<Option<License>>;

    /// Returns `false` without mutating for unknown statuses or keys.
    async fn update_license_status(&self, key: &str, status: &str) -> Result<bool>;

    async fn mark_activated(&self, key: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn mark_validated(&self, key: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn check_integrity(&self, key: &str) -> Result<IntegrityReport>;

    fn check_expiry(&self, license: &License) -> ExpiryCheck {
        license.check_expiry(Utc::now())
    }

    async fn license_statistics(&self) -> Result<LicenseStatistics>;

    /// Record that `fingerprint` holds the license.
    ///
    /// Fails with `ActivationConflict` while another machine holds an active
    /// activation. An existing active row for the same machine is reused and
    /// only its `device_info` refreshed.
    async fn create_activation(
        &self,
        license_id: LicenseId,
        fingerprint: &str,
        device_info: &serde_json::Value,
    ) -> Result<ActivationId>;

    async fn find_activation(
        &self,
        license_id: LicenseId,
        fingerprint: &str,
    ) -> Result<Option<Activation>>;

    async fn active_activations(&self, license_id: LicenseId) -> Result<Vec<Activation>>;

    async fn deactivate(&self, license_id: LicenseId, fingerprint: &str) -> Result<bool>;

    /// Support operation; removes the license and its activations.
    async fn delete_license(&self, key: &str) -> Result<bool>;
}

/// The cloud license authority.
///
/// Network absence is an ordinary outcome: no method panics, and every call
/// is bounded by the implementation's timeouts and retry budget.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Fast connectivity probe.
    async fn is_online(&self) -> bool;

    /// Validate a key, falling back to local data when the cloud is unreachable.
    async fn validate_license(&self, key: &str) -> RemoteValidation;

    async fn check_activation(
        &self,
        key: &str,
        fingerprint: &str,
    ) -> std::result::Result<ActivationCheck, RemoteError>;

    async fn record_activation(
        &self,
        key: &str,
        fingerprint: &str,
        device_info: &serde_json::Value,
    ) -> std::result::Result<(), RemoteError>;

    async fn check_trial_eligibility(
        &self,
        machine_id: &str,
    ) -> std::result::Result<TrialEligibility, RemoteError>;

    async fn generate_trial_license(
        &self,
        machine_id: &str,
    ) -> std::result::Result<TrialGrant, RemoteError>;
}
