//! Remote authority call outcomes and wire payloads.

use crate::license::{License, LicenseGrant, ProductType};
use crate::validation::ValidationSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("license server unreachable after {attempts} attempt(s): {}", .errors.join("; "))]
    Unreachable { attempts: u32, errors: Vec<String> },

    #[error("license server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("license server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("license server refused: {0}")]
    Refused(String),

    #[error("unexpected response from license server: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// The server could not give an answer: callers take the offline branch.
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Unreachable { .. } | RemoteError::Server { .. })
    }

    /// The server answered definitively; retrying will not change the outcome.
    pub fn is_definitive(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. } | RemoteError::Refused(_))
    }
}

/// Outcome of `validate_license`, including the offline fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteValidation {
    /// Some authority (cloud or local fallback) produced an answer.
    pub success: bool,
    pub valid: bool,
    /// License data issued by the cloud.
    pub grant: Option<LicenseGrant>,
    /// Local row used by the offline fallback.
    pub cached: Option<License>,
    pub source: ValidationSource,
    pub message: Option<String>,
    /// Every error met on the way, oldest first.
    pub errors: Vec<String>,
}

impl RemoteValidation {
    pub fn cloud(valid: bool, grant: Option<LicenseGrant>, message: Option<String>) -> Self {
        Self {
            success: true,
            valid,
            grant,
            cached: None,
            source: ValidationSource::Cloud,
            message,
            errors: Vec::new(),
        }
    }

    pub fn offline(cached: Option<License>, valid: bool, errors: Vec<String>) -> Self {
        Self {
            success: cached.is_some(),
            valid,
            grant: None,
            cached,
            source: ValidationSource::Offline,
            message: None,
            errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationReason {
    NewActivation,
    SameMachineReactivation,
    AlreadyActivatedOnAnotherDevice,
    LicenseExpired,
    LicenseInactive,
    LicenseNotFound,
    #[serde(other)]
    Unknown,
}

/// The activation currently holding a license, as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteActivation {
    pub machine_fingerprint: String,
    #[serde(default)]
    pub activation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationCheck {
    pub can_activate: bool,
    pub reason: ActivationReason,
    #[serde(default)]
    pub license_data: Option<LicenseGrant>,
    #[serde(default)]
    pub existing_activation: Option<RemoteActivation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialEligibility {
    pub eligible: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A freshly issued trial license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialGrant {
    pub trial_license_key: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

impl TrialGrant {
    /// Trial length in whole days, rounded up.
    pub fn duration_days(&self, now: DateTime<Utc>) -> u32 {
        let secs = (self.expires_at - now).num_seconds().max(0);
        ((secs + 86_399) / 86_400) as u32
    }

    pub fn to_license_grant(&self, machine_id: &str, now: DateTime<Utc>) -> LicenseGrant {
        let email = self.customer_email.clone().unwrap_or_else(|| {
            let hint: String = machine_id.chars().take(8).collect();
            format!("trial-{hint}@trial.local")
        });
        LicenseGrant::new(
            self.trial_license_key.clone(),
            email,
            ProductType::trial(self.duration_days(now)),
        )
        .with_features(self.features.iter().cloned())
        .expires_at(self.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unknown_reason_is_tolerated() {
        let check: ActivationCheck =
            serde_json::from_str(r#"{"can_activate":false,"reason":"quota_exceeded"}"#).unwrap();
        assert_eq!(check.reason, ActivationReason::Unknown);
        assert!(check.license_data.is_none());
    }

    #[test]
    fn test_trial_grant_product_type() {
        let now = Utc::now();
        let trial = TrialGrant {
            trial_license_key: "TRIAL-ABCD-EFGH-1234".into(),
            expires_at: now + Duration::days(7),
            features: ["basic".to_string()].into_iter().collect(),
            customer_email: None,
        };
        let grant = trial.to_license_grant("0123456789abcdef", now);
        assert_eq!(grant.product_type, ProductType::trial(7));
        assert_eq!(grant.customer_email, "trial-01234567@trial.local");
        assert!(grant.features.contains("basic"));
    }

    #[test]
    fn test_network_classification() {
        let unreachable = RemoteError::Unreachable {
            attempts: 3,
            errors: vec!["timeout".into()],
        };
        assert!(unreachable.is_network());
        assert!(unreachable.to_string().contains("3 attempt"));
        let rejected = RemoteError::Rejected {
            status: 404,
            message: "not found".into(),
        };
        assert!(!rejected.is_network());
        assert!(rejected.is_definitive());
    }
}
