//! Activation records binding a license to one machine.

use crate::ids::{ActivationId, LicenseId};
use crate::validation::ValidationSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    Active,
    Deactivated,
}

impl ActivationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationState::Active => "active",
            ActivationState::Deactivated => "deactivated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ActivationState::Active),
            "deactivated" => Some(ActivationState::Deactivated),
            _ => None,
        }
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub id: ActivationId,
    pub license_id: LicenseId,
    pub machine_fingerprint: String,
    pub activation_time: DateTime<Utc>,
    pub status: ActivationState,
    /// Free-form JSON; see [`DeviceInfo`] for what this crate writes.
    pub device_info: serde_json::Value,
}

impl Activation {
    pub fn is_active(&self) -> bool {
        self.status == ActivationState::Active
    }

    pub fn fingerprint_hint(&self) -> String {
        fingerprint_hint(&self.machine_fingerprint)
    }

    /// Channel recorded in `device_info`, if any.
    pub fn validation_source(&self) -> Option<ValidationSource> {
        self.device_info
            .get("validation_source")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Masked fingerprint safe to show to another machine's user.
pub fn fingerprint_hint(fingerprint: &str) -> String {
    let visible: String = fingerprint.chars().take(8).collect();
    format!("{visible}…")
}

/// The `device_info` document written for new activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Where the activation was decided (`cloud` or `database_only`).
    pub activation_source: String,
    pub activated_at: DateTime<Utc>,
    pub validation_source: ValidationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl DeviceInfo {
    pub fn new(source: ValidationSource, activated_at: DateTime<Utc>) -> Self {
        Self {
            activation_source: source.as_str().to_string(),
            activated_at,
            validation_source: source,
            hostname: None,
            os: None,
        }
    }

    pub fn with_host(mut self, hostname: impl Into<String>, os: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self.os = Some(os.into());
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hint_masks_tail() {
        assert_eq!(fingerprint_hint("0123456789abcdef0123456789abcdef"), "01234567…");
    }

    #[test]
    fn test_device_info_records_channel() {
        let info = DeviceInfo::new(ValidationSource::DatabaseOnly, Utc::now());
        let activation = Activation {
            id: ActivationId::new(),
            license_id: LicenseId::new(),
            machine_fingerprint: "f".repeat(32),
            activation_time: Utc::now(),
            status: ActivationState::Active,
            device_info: info.to_value(),
        };
        assert_eq!(activation.device_info["activation_source"], "database_only");
        assert_eq!(
            activation.validation_source(),
            Some(ValidationSource::DatabaseOnly)
        );
    }
}
