//! Trial eligibility and issuance.

use chrono::Utc;
use entitle_core::license::{License, key_prefix};
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::validation::ValidationSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseType {
    Paid,
    Trial,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Active,
    Expired,
    NotEligible,
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialStatus {
    /// Kind of license found or issued.
    pub license_type: LicenseType,
    /// Trial state.
    pub status: TrialState,
    /// Whole days left; `Some(0)` once expired.
    pub days_left: Option<i64>,
    /// The paid or trial license.
    pub license_data: Option<License>,
    /// Where the answer came from.
    pub source: ValidationSource,
    /// Explanation for anything but an active license.
    pub message: Option<String>,
}

impl TrialStatus {
    fn from_license(license_type: LicenseType, license: License, source: ValidationSource) -> Self {
        let expiry = license.check_expiry(Utc::now());
        let usable = license.is_usable(Utc::now());
        Self {
            license_type,
            status: if usable {
                TrialState::Active
            } else {
                TrialState::Expired
            },
            days_left: if usable { expiry.days_remaining } else { Some(0) },
            message: (!usable).then(|| match expiry.days_expired {
                Some(days) => format!("trial expired {days} day(s) ago"),
                None => format!("trial is {}", license.status),
            }),
            license_data: Some(license),
            source,
        }
    }

    fn without_license(status: TrialState, source: ValidationSource, message: impl Into<String>) -> Self {
        Self {
            license_type: LicenseType::None,
            status,
            days_left: None,
            license_data: None,
            source,
            message: Some(message.into()),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == TrialState::Active
    }
}

/// Issues at most one trial per machine. Eligibility is decided only by the
/// remote authority; no trial is ever granted locally.
pub struct TrialService {
    store: Arc<dyn LicenseStore>,
    remote: Arc<dyn RemoteAuthority>,
}

impl TrialService {
    pub fn new(store: Arc<dyn LicenseStore>, remote: Arc<dyn RemoteAuthority>) -> Self {
        Self { store, remote }
    }

    pub async fn check_or_create_trial(&self, machine_id: &str) -> TrialStatus {
        match self.store.get_active_paid_license().await {
            Ok(Some(license)) => {
                return TrialStatus::from_license(LicenseType::Paid, license, ValidationSource::Cache);
            }
            Ok(None) => {}
            Err(e) => {
                return TrialStatus::without_license(TrialState::Error, ValidationSource::Error, e.to_string());
            }
        }

        match self.store.get_latest_trial().await {
            Ok(Some(trial)) => {
                return TrialStatus::from_license(LicenseType::Trial, trial, ValidationSource::Cache);
            }
            Ok(None) => {}
            Err(e) => {
                return TrialStatus::without_license(TrialState::Error, ValidationSource::Error, e.to_string());
            }
        }

        let eligibility = match self.remote.check_trial_eligibility(machine_id).await {
            Ok(eligibility) => eligibility,
            Err(e) if e.is_network() => {
                warn!(error = %e, "Trial eligibility unavailable offline");
                return TrialStatus::without_license(
                    TrialState::Unavailable,
                    ValidationSource::Offline,
                    "trial activation requires a connection to the license server",
                );
            }
            Err(e) => {
                return TrialStatus::without_license(TrialState::Error, ValidationSource::Cloud, e.to_string());
            }
        };

        if !eligibility.eligible {
            info!(reason = ?eligibility.reason, "Machine is not eligible for a trial");
            let message = eligibility
                .message
                .or(eligibility.reason)
                .unwrap_or_else(|| "this machine is not eligible for a trial".to_string());
            return TrialStatus::without_license(TrialState::NotEligible, ValidationSource::Cloud, message);
        }

        let issued = match self.remote.generate_trial_license(machine_id).await {
            Ok(issued) => issued,
            Err(e) => {
                warn!(error = %e, "Trial generation failed");
                return TrialStatus::without_license(TrialState::Error, ValidationSource::Cloud, e.to_string());
            }
        };

        let grant = issued.to_license_grant(machine_id, Utc::now());
        let stored = match self.store.create_license(&grant).await {
            Ok(_) => self.store.get_license_by_key(&grant.license_key).await,
            Err(e) => Err(e),
        };

        match stored {
            Ok(Some(license)) => {
                info!(
                    key = key_prefix(&license.license_key),
                    product = %license.product_type,
                    "Trial license issued"
                );
                TrialStatus::from_license(LicenseType::Trial, license, ValidationSource::Cloud)
            }
            Ok(None) => TrialStatus::without_license(
                TrialState::Error,
                ValidationSource::Cloud,
                "trial license was not persisted",
            ),
            Err(e) => {
                warn!(error = %e, "Could not store trial license");
                TrialStatus::without_license(TrialState::Error, ValidationSource::Cloud, e.to_string())
            }
        }
    }
}
