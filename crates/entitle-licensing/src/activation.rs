//! Single-device license activation.

use crate::engine::KeyPolicy;
use crate::machine::MachineIdentity;
use chrono::{DateTime, Utc};
use entitle_core::activation::{DeviceInfo, fingerprint_hint};
use entitle_core::config::LicensingConfig;
use entitle_core::license::{License, LicenseGrant, LicenseStatus, key_prefix};
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::remote::{ActivationCheck, ActivationReason, RemoteActivation, RemoteError};
use entitle_core::validation::ValidationSource;
use entitle_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Activated,
    AlreadyActivatedThisMachine,
    ActivatedElsewhere,
    LicenseExpired,
    LicenseInactive,
    LicenseNotFound,
    InvalidKey,
    NetworkUnavailable,
    Failed,
}

impl ActivationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationStatus::Activated => "activated",
            ActivationStatus::AlreadyActivatedThisMachine => "already_activated_this_machine",
            ActivationStatus::ActivatedElsewhere => "activated_elsewhere",
            ActivationStatus::LicenseExpired => "license_expired",
            ActivationStatus::LicenseInactive => "license_inactive",
            ActivationStatus::LicenseNotFound => "license_not_found",
            ActivationStatus::InvalidKey => "invalid_key",
            ActivationStatus::NetworkUnavailable => "network_unavailable",
            ActivationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The activation that blocks this machine, as shown to its user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingActivation {
    /// When the other machine activated.
    pub activated_at: Option<DateTime<Utc>>,
    /// Device details the other machine reported.
    pub device_info: serde_json::Value,
    /// First eight fingerprint characters, the rest masked.
    pub fingerprint_hint: String,
}

impl ExistingActivation {
    fn from_remote(remote: &RemoteActivation) -> Self {
        Self {
            activated_at: remote.activation_time,
            device_info: remote.device_info.clone(),
            fingerprint_hint: fingerprint_hint(&remote.machine_fingerprint),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationOutcome {
    /// This machine holds the license.
    pub success: bool,
    /// The license itself validated.
    pub valid: bool,
    /// Machine-readable outcome.
    pub activation_status: ActivationStatus,
    /// Activated license.
    pub data: Option<License>,
    /// Human-readable failure.
    pub error: Option<String>,
    /// Retrying later may succeed (network trouble only).
    pub retryable: bool,
    /// The other machine holding the license.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_activation: Option<ExistingActivation>,
    /// Where the license data came from.
    pub validation_source: ValidationSource,
}

impl ActivationOutcome {
    fn activated(status: ActivationStatus, license: Option<License>, source: ValidationSource) -> Self {
        Self {
            success: true,
            valid: true,
            activation_status: status,
            data: license,
            error: None,
            retryable: false,
            existing_activation: None,
            validation_source: source,
        }
    }

    fn refused(status: ActivationStatus, error: impl Into<String>, source: ValidationSource) -> Self {
        Self {
            success: false,
            valid: false,
            activation_status: status,
            data: None,
            error: Some(error.into()),
            retryable: status == ActivationStatus::NetworkUnavailable,
            existing_activation: None,
            validation_source: source,
        }
    }

    fn elsewhere(existing: ExistingActivation, source: ValidationSource) -> Self {
        let mut outcome = Self::refused(
            ActivationStatus::ActivatedElsewhere,
            "license is already activated on another device",
            source,
        );
        outcome.existing_activation = Some(existing);
        outcome
    }
}

/// Binds licenses to this machine.
///
/// Online, the remote authority decides; offline, the local store is trusted
/// and enforces one active machine per license.
pub struct ActivationManager {
    store: Arc<dyn LicenseStore>,
    remote: Arc<dyn RemoteAuthority>,
    policy: KeyPolicy,
    identity: MachineIdentity,
}

impl ActivationManager {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        remote: Arc<dyn RemoteAuthority>,
        config: &LicensingConfig,
        identity: MachineIdentity,
    ) -> Self {
        Self {
            store,
            remote,
            policy: KeyPolicy::from_config(config),
            identity,
        }
    }

    pub fn fingerprint(&self) -> &str {
        self.identity.fingerprint()
    }

    fn device_info(&self, source: ValidationSource) -> serde_json::Value {
        DeviceInfo::new(source, Utc::now())
            .with_host(self.identity.hostname(), self.identity.info().os_label())
            .to_value()
    }

    pub async fn activate(&self, key: &str, force_offline: bool) -> ActivationOutcome {
        let key = key.trim();

        if let Err(e) = self.policy.screen(key) {
            return ActivationOutcome::refused(
                ActivationStatus::InvalidKey,
                e.to_string(),
                ValidationSource::None,
            );
        }

        let outcome = if force_offline {
            self.activate_offline(key, None).await
        } else if !self.remote.is_online().await {
            self.activate_offline(key, Some("license server unreachable".to_string()))
                .await
        } else {
            match self.remote.check_activation(key, self.fingerprint()).await {
                Ok(check) => self.apply_remote_decision(key, check).await,
                Err(e) if e.is_network() => self.activate_offline(key, Some(e.to_string())).await,
                Err(RemoteError::Rejected { status: 404, .. }) => ActivationOutcome::refused(
                    ActivationStatus::LicenseNotFound,
                    "license not found",
                    ValidationSource::Cloud,
                ),
                Err(e) => ActivationOutcome::refused(
                    ActivationStatus::Failed,
                    e.to_string(),
                    ValidationSource::Cloud,
                ),
            }
        };

        info!(
            key = key_prefix(key),
            status = %outcome.activation_status,
            source = %outcome.validation_source,
            "Activation finished"
        );
        outcome
    }

    async fn apply_remote_decision(&self, key: &str, check: ActivationCheck) -> ActivationOutcome {
        let cloud = ValidationSource::Cloud;
        let refusal = |status, message: &str| ActivationOutcome::refused(status, message, cloud);

        match check.reason {
            ActivationReason::LicenseExpired => {
                refusal(ActivationStatus::LicenseExpired, "license has expired")
            }
            ActivationReason::LicenseInactive => {
                refusal(ActivationStatus::LicenseInactive, "license is not active")
            }
            ActivationReason::LicenseNotFound => {
                refusal(ActivationStatus::LicenseNotFound, "license not found")
            }
            ActivationReason::AlreadyActivatedOnAnotherDevice => {
                let existing = check
                    .existing_activation
                    .as_ref()
                    .map(ExistingActivation::from_remote)
                    .unwrap_or_else(|| ExistingActivation {
                        activated_at: None,
                        device_info: serde_json::json!({}),
                        fingerprint_hint: String::new(),
                    });
                warn!(
                    key = key_prefix(key),
                    holder = %existing.fingerprint_hint,
                    "License is active on another machine"
                );
                ActivationOutcome::elsewhere(existing, cloud)
            }
            ActivationReason::SameMachineReactivation => {
                match self.bind_locally(key, check.license_data, cloud).await {
                    Ok(license) => ActivationOutcome::activated(
                        ActivationStatus::AlreadyActivatedThisMachine,
                        license,
                        cloud,
                    ),
                    Err(e) => refusal(ActivationStatus::Failed, &e.to_string()),
                }
            }
            ActivationReason::NewActivation | ActivationReason::Unknown if check.can_activate => {
                let device_info = self.device_info(cloud);
                if let Err(e) = self
                    .remote
                    .record_activation(key, self.fingerprint(), &device_info)
                    .await
                {
                    warn!(key = key_prefix(key), error = %e, "Cloud did not record activation");
                    let status = if e.is_network() {
                        ActivationStatus::NetworkUnavailable
                    } else {
                        ActivationStatus::Failed
                    };
                    return refusal(status, &e.to_string());
                }

                match self.bind_locally(key, check.license_data, cloud).await {
                    Ok(license) => {
                        ActivationOutcome::activated(ActivationStatus::Activated, license, cloud)
                    }
                    Err(e) => refusal(ActivationStatus::Failed, &e.to_string()),
                }
            }
            ActivationReason::NewActivation | ActivationReason::Unknown => {
                refusal(ActivationStatus::Failed, "license server refused activation")
            }
        }
    }

    /// Mirror a cloud-approved activation into the local store. The cloud is
    /// authoritative, so stale local activations of other machines are released.
    async fn bind_locally(
        &self,
        key: &str,
        grant: Option<LicenseGrant>,
        source: ValidationSource,
    ) -> Result<Option<License>> {
        let grant = match grant {
            Some(grant) => Some(grant),
            None if self.store.get_license_by_key(key).await?.is_none() => {
                self.remote.validate_license(key).await.grant
            }
            None => None,
        };
        if let Some(grant) = &grant {
            self.store.sync_license(grant).await?;
        }

        let Some(license) = self.store.get_license_by_key(key).await? else {
            warn!(key = key_prefix(key), "Activated without license data to cache locally");
            return Ok(None);
        };

        let now = Utc::now();
        let device_info = self.device_info(source);
        match self
            .store
            .create_activation(license.id, self.fingerprint(), &device_info)
            .await
        {
            Ok(_) => {}
            Err(Error::ActivationConflict { .. }) => {
                for stale in self.store.active_activations(license.id).await? {
                    if stale.machine_fingerprint != self.fingerprint() {
                        warn!(
                            key = key_prefix(key),
                            holder = %stale.fingerprint_hint(),
                            "Releasing stale local activation"
                        );
                        self.store
                            .deactivate(license.id, &stale.machine_fingerprint)
                            .await?;
                    }
                }
                self.store
                    .create_activation(license.id, self.fingerprint(), &device_info)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        self.store.mark_activated(key, now).await?;
        self.store.mark_validated(key, now).await?;
        self.store.get_license_by_key(key).await
    }

    async fn activate_offline(&self, key: &str, network_error: Option<String>) -> ActivationOutcome {
        let local = ValidationSource::DatabaseOnly;

        let license = match self.store.get_license_by_key(key).await {
            Ok(Some(license)) => license,
            Ok(None) => {
                return match network_error {
                    Some(e) => ActivationOutcome::refused(
                        ActivationStatus::NetworkUnavailable,
                        format!("license is not cached locally and {e}"),
                        ValidationSource::Offline,
                    ),
                    None => ActivationOutcome::refused(
                        ActivationStatus::LicenseNotFound,
                        "license is not cached locally",
                        local,
                    ),
                };
            }
            Err(e) => return ActivationOutcome::refused(ActivationStatus::Failed, e.to_string(), local),
        };

        match license.status {
            LicenseStatus::Suspended => {
                return ActivationOutcome::refused(
                    ActivationStatus::LicenseInactive,
                    "license is suspended",
                    local,
                );
            }
            LicenseStatus::Expired => {
                return ActivationOutcome::refused(
                    ActivationStatus::LicenseExpired,
                    "license has expired",
                    local,
                );
            }
            LicenseStatus::Active | LicenseStatus::Inactive => {}
        }

        let expiry = self.store.check_expiry(&license);
        if expiry.expired {
            return ActivationOutcome::refused(
                ActivationStatus::LicenseExpired,
                format!(
                    "license expired {} day(s) ago",
                    expiry.days_expired.unwrap_or(0)
                ),
                local,
            );
        }

        match self.bind_offline(&license).await {
            Ok((status, license)) => ActivationOutcome::activated(status, Some(license), local),
            Err(Error::ActivationConflict { activated_at }) => {
                let holder = self
                    .store
                    .active_activations(license.id)
                    .await
                    .ok()
                    .and_then(|active| {
                        active
                            .into_iter()
                            .find(|a| a.machine_fingerprint != self.fingerprint())
                    });
                let existing = ExistingActivation {
                    activated_at: Some(activated_at),
                    device_info: holder
                        .as_ref()
                        .map(|a| a.device_info.clone())
                        .unwrap_or_else(|| serde_json::json!({})),
                    fingerprint_hint: holder
                        .as_ref()
                        .map(|a| a.fingerprint_hint())
                        .unwrap_or_default(),
                };
                ActivationOutcome::elsewhere(existing, local)
            }
            Err(e) => ActivationOutcome::refused(ActivationStatus::Failed, e.to_string(), local),
        }
    }

    async fn bind_offline(&self, license: &License) -> Result<(ActivationStatus, License)> {
        let already = self
            .store
            .find_activation(license.id, self.fingerprint())
            .await?
            .is_some_and(|a| a.is_active());

        let device_info = self.device_info(ValidationSource::DatabaseOnly);
        self.store
            .create_activation(license.id, self.fingerprint(), &device_info)
            .await?;

        let now = Utc::now();
        self.store.mark_activated(&license.license_key, now).await?;

        let status = if already {
            ActivationStatus::AlreadyActivatedThisMachine
        } else {
            ActivationStatus::Activated
        };
        let refreshed = self
            .store
            .get_license_by_key(&license.license_key)
            .await?
            .unwrap_or_else(|| license.clone());
        Ok((status, refreshed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ActivationStatus::AlreadyActivatedThisMachine).unwrap();
        assert_eq!(json, r#""already_activated_this_machine""#);
        assert_eq!(ActivationStatus::NetworkUnavailable.to_string(), "network_unavailable");
    }

    #[test]
    fn test_only_network_refusals_are_retryable() {
        let offline = ActivationOutcome::refused(
            ActivationStatus::NetworkUnavailable,
            "offline",
            ValidationSource::Offline,
        );
        assert!(offline.retryable);
        let expired = ActivationOutcome::refused(
            ActivationStatus::LicenseExpired,
            "expired",
            ValidationSource::Cloud,
        );
        assert!(!expired.retryable);
        assert!(!expired.success);
    }

    #[test]
    fn test_existing_activation_masks_fingerprint() {
        let remote = RemoteActivation {
            machine_fingerprint: "0123456789abcdef0123456789abcdef".into(),
            activation_time: None,
            device_info: serde_json::json!({"hostname": "desk-2"}),
        };
        let existing = ExistingActivation::from_remote(&remote);
        assert_eq!(existing.fingerprint_hint, "01234567…");
        assert_eq!(existing.device_info["hostname"], "desk-2");
    }
}
