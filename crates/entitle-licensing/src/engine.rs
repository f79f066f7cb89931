//! Multi-step license validation pipeline.

use chrono::Utc;
use entitle_core::config::LicensingConfig;
use entitle_core::license::{License, LicenseGrant, LicenseStatus, key_prefix};
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::validation::{Check, ValidationResult, ValidationSource, ValidationStatus};
use entitle_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cheap syntactic screen applied before any lookup. Not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPolicy {
    pub min_key_length: usize,
    pub blocked_prefixes: Vec<String>,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::from_config(&LicensingConfig::default())
    }
}

impl KeyPolicy {
    pub fn from_config(config: &LicensingConfig) -> Self {
        Self {
            min_key_length: config.min_key_length,
            blocked_prefixes: config.blocked_prefixes.clone(),
        }
    }

    /// Trimmed length must reach `min_key_length`.
    pub fn check_format(&self, key: &str) -> Result<()> {
        let len = key.trim().chars().count();
        if len < self.min_key_length {
            return Err(Error::InvalidKeyFormat(format!(
                "key has {len} characters, at least {} required",
                self.min_key_length
            )));
        }
        Ok(())
    }

    pub fn is_obviously_invalid(&self, key: &str) -> bool {
        let key = key.trim().to_lowercase();
        self.blocked_prefixes
            .iter()
            .any(|prefix| key.starts_with(&prefix.to_lowercase()))
    }

    /// Both screens; the error names the first one that failed.
    pub fn screen(&self, key: &str) -> Result<()> {
        self.check_format(key)?;
        if self.is_obviously_invalid(key) {
            return Err(Error::InvalidKeyFormat(
                "key matches a known placeholder pattern".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs format, pattern, local integrity, expiry and cloud checks and
/// folds them into one [`ValidationResult`].
pub struct ValidationEngine {
    store: Arc<dyn LicenseStore>,
    remote: Arc<dyn RemoteAuthority>,
    policy: KeyPolicy,
    expiry_warning_days: i64,
}

impl ValidationEngine {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        remote: Arc<dyn RemoteAuthority>,
        config: &LicensingConfig,
    ) -> Self {
        Self {
            store,
            remote,
            policy: KeyPolicy::from_config(config),
            expiry_warning_days: config.expiry_warning_days,
        }
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    /// Validate `key`.
    ///
    /// In strict mode every failed check invalidates the result and the cloud
    /// is always consulted. `force_online` consults the cloud even when local
    /// data resolved the key.
    pub async fn validate_comprehensive(
        &self,
        key: &str,
        strict_mode: bool,
        force_online: bool,
    ) -> ValidationResult {
        let key = key.trim();
        let mut result = ValidationResult::new();
        let mut state = PipelineState::default();

        // Critical screens stop the pipeline.
        match self.policy.check_format(key) {
            Ok(()) => result.record(Check::FormatValidation, true),
            Err(e) => {
                result.record(Check::FormatValidation, false);
                result.errors.push(e.to_string());
                state.fail(Check::FormatValidation, e);
                return self.finish(key, result, strict_mode, state);
            }
        }

        let blocked = self.policy.is_obviously_invalid(key);
        result.record(Check::ObviousInvalidCheck, !blocked);
        if blocked {
            let e = Error::InvalidKeyFormat("key matches a known placeholder pattern".to_string());
            result.errors.push(e.to_string());
            state.fail(Check::ObviousInvalidCheck, e);
            return self.finish(key, result, strict_mode, state);
        }

        match self.store.check_integrity(key).await {
            Ok(report) if report.valid => {
                result.record(Check::LocalIntegrity, true);
                result.license_data = report.license;
                result.validation_source = ValidationSource::DatabaseOnly;
                state.data_seen = result.license_data.is_some();
            }
            Ok(report) => {
                debug!(key = key_prefix(key), issues = ?report.issues, "Local integrity failed");
                result.record(Check::LocalIntegrity, false);
                let e = if report.license.is_some() {
                    state.data_seen = true;
                    let e = Error::IntegrityViolation(report.issues.join("; "));
                    result.warnings.extend(report.issues);
                    e
                } else {
                    Error::LicenseNotFound(key_prefix(key).to_string())
                };
                state.fail(Check::LocalIntegrity, e);
            }
            Err(e) => {
                warn!(key = key_prefix(key), error = %e, "License store unavailable");
                result.record(Check::LocalIntegrity, false);
                result.errors.push(e.to_string());
                state.store_failed = true;
                state.fail(Check::LocalIntegrity, e);
            }
        }

        if let Some(license) = result.license_data.clone() {
            self.evaluate_expiry(&mut result, &mut state, &license, false);
        }

        if force_online || strict_mode || result.license_data.is_none() {
            self.confirm_with_cloud(key, &mut result, &mut state).await;
        }

        self.finish(key, result, strict_mode, state)
    }

    async fn confirm_with_cloud(
        &self,
        key: &str,
        result: &mut ValidationResult,
        state: &mut PipelineState,
    ) {
        let remote = self.remote.validate_license(key).await;
        result.errors.extend(remote.errors.iter().cloned());

        if remote.source == ValidationSource::Cloud {
            result.record(Check::CloudValidation, remote.valid);

            if !remote.valid {
                info!(key = key_prefix(key), "License rejected by license server");
                let message = remote
                    .message
                    .unwrap_or_else(|| "license rejected by license server".to_string());
                result.license_data = None;
                result.validation_source = ValidationSource::Cloud;
                state.cloud_rejected = true;
                result.warn(message.clone());
                state.fail(Check::CloudValidation, Error::IntegrityViolation(message));
                return;
            }

            let now = Utc::now();
            if let Some(grant) = remote.grant {
                let license = self.persist_cloud_grant(&grant, result).await;
                result.license_data = Some(license);
            } else if let Some(license) = result.license_data.as_mut() {
                match self.store.mark_validated(&license.license_key, now).await {
                    Ok(_) => license.last_validated_at = Some(now),
                    Err(e) => result.errors.push(e.to_string()),
                }
            }

            if let Some(license) = result.license_data.clone() {
                result.validation_source = ValidationSource::Cloud;
                state.data_seen = true;
                self.evaluate_expiry(result, state, &license, true);
            }
            return;
        }

        result.record(Check::CloudValidation, false);
        result.warn("license server unreachable, validated offline");
        let reason = remote
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| "license server unreachable".to_string());
        state.fail(Check::CloudValidation, Error::Network(reason));

        if result.license_data.is_none() {
            if let Some(cached) = remote.cached {
                info!(key = key_prefix(key), "Using cached license from offline fallback");
                state.data_seen = true;
                result.validation_source = result.validation_source.max_trust(remote.source);
                self.evaluate_expiry(result, state, &cached, true);
                result.license_data = Some(cached);
            }
        }
    }

    /// Upsert cloud data locally. A store failure is recorded but the cloud
    /// data is still used.
    async fn persist_cloud_grant(&self, grant: &LicenseGrant, result: &mut ValidationResult) -> License {
        let now = Utc::now();
        let stored: Result<Option<License>> = async {
            self.store.sync_license(grant).await?;
            self.store.mark_validated(&grant.license_key, now).await?;
            self.store.get_license_by_key(&grant.license_key).await
        }
        .await;

        match stored {
            Ok(Some(license)) => license,
            Ok(None) => {
                let e = Error::Internal("synced license missing from the store".to_string());
                warn!(key = key_prefix(&grant.license_key), error = %e, "Could not cache cloud license");
                result.errors.push(e.to_string());
                License::from_grant(grant, Default::default(), now)
            }
            Err(e) => {
                warn!(key = key_prefix(&grant.license_key), error = %e, "Could not cache cloud license");
                result.errors.push(e.to_string());
                let mut license = License::from_grant(grant, Default::default(), now);
                license.last_validated_at = Some(now);
                license
            }
        }
    }

    fn evaluate_expiry(
        &self,
        result: &mut ValidationResult,
        state: &mut PipelineState,
        license: &License,
        replace: bool,
    ) {
        let expiry = self.store.check_expiry(license);
        let expired = expiry.expired || license.status == LicenseStatus::Expired;

        if replace {
            result.rerecord(Check::ExpiryCheck, !expired);
        } else {
            result.record(Check::ExpiryCheck, !expired);
        }

        if expired {
            let days_expired = expiry.days_expired.unwrap_or(0);
            result.warn(format!("license expired {days_expired} day(s) ago"));
            state.fail(Check::ExpiryCheck, Error::LicenseExpired { days_expired });
            return;
        }

        state.pass(Check::ExpiryCheck);
        if let Some(days) = expiry.days_remaining {
            if days <= self.expiry_warning_days {
                result.warn(format!("license expires in {days} day(s)"));
            }
        }
    }

    fn finish(
        &self,
        key: &str,
        mut result: ValidationResult,
        strict_mode: bool,
        state: PipelineState,
    ) -> ValidationResult {
        let suspended = result
            .license_data
            .as_ref()
            .is_some_and(|license| license.status == LicenseStatus::Suspended);
        if suspended {
            result.warn("license is suspended");
        }

        result.valid = state.recoverable(strict_mode) && !suspended && result.license_data.is_some();

        result.status = if result.license_data.is_some() && result.failed(Check::ExpiryCheck) {
            ValidationStatus::Expired
        } else if result.valid {
            ValidationStatus::Valid
        } else if result.license_data.is_none() && state.store_failed && !state.cloud_rejected {
            ValidationStatus::Error
        } else if !state.data_seen && !state.cloud_rejected && !result.critical_failure() {
            ValidationStatus::NoLicense
        } else {
            ValidationStatus::Invalid
        };

        if result.license_data.is_none() && result.validation_source != ValidationSource::Cloud {
            result.validation_source = if result.status == ValidationStatus::Error {
                ValidationSource::Error
            } else {
                ValidationSource::None
            };
        }

        let result = result.seal();
        info!(
            key = key_prefix(key),
            valid = result.valid,
            status = ?result.status,
            source = %result.validation_source,
            failed = ?result.checks_failed,
            "License validation complete"
        );
        result
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    /// Some source produced license data at any point.
    data_seen: bool,
    store_failed: bool,
    cloud_rejected: bool,
    /// Latest failure per check; a later pass of the same check clears it.
    failures: Vec<(Check, Error)>,
}

impl PipelineState {
    fn fail(&mut self, check: Check, error: Error) {
        self.pass(check);
        self.failures.push((check, error));
    }

    fn pass(&mut self, check: Check) {
        self.failures.retain(|(c, _)| *c != check);
    }

    fn recoverable(&self, strict_mode: bool) -> bool {
        self.failures
            .iter()
            .all(|(_, error)| error.is_recoverable(strict_mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uses_trimmed_length() {
        let policy = KeyPolicy::default();
        assert!(policy.check_format("ABCDEFGHIJ").is_ok());
        assert!(policy.check_format("  ABCDEFGHI  ").is_err());
        assert!(matches!(
            policy.check_format("short"),
            Err(Error::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_blocklist_is_case_insensitive() {
        let policy = KeyPolicy::default();
        assert!(policy.is_obviously_invalid("TEST-1234-5678"));
        assert!(policy.is_obviously_invalid("Demo-License-Key"));
        assert!(policy.is_obviously_invalid("invalid-0000000"));
        assert!(!policy.is_obviously_invalid("ENT-TEST-1234-5678"));
        assert!(policy.screen("fake-license-key").is_err());
        assert!(policy.screen("ENT-2025-ABCD-EFGH").is_ok());
    }

    #[test]
    fn test_failures_follow_recovery_policy() {
        let mut state = PipelineState::default();
        state.fail(Check::ExpiryCheck, Error::LicenseExpired { days_expired: 2 });
        state.fail(Check::CloudValidation, Error::Network("timeout".into()));
        assert!(state.recoverable(false));
        assert!(!state.recoverable(true));

        state.pass(Check::ExpiryCheck);
        state.pass(Check::CloudValidation);
        assert!(state.recoverable(true));

        state.fail(Check::FormatValidation, Error::InvalidKeyFormat("short".into()));
        assert!(!state.recoverable(false));
    }

    #[test]
    fn test_policy_follows_config() {
        let mut config = LicensingConfig::default();
        config.min_key_length = 4;
        config.blocked_prefixes = vec!["sample".into()];
        let policy = KeyPolicy::from_config(&config);
        assert!(policy.screen("ABCD").is_ok());
        assert!(policy.screen("test-key-123").is_ok());
        assert!(policy.screen("SAMPLE-KEY").is_err());
    }
}
