//! Validation result contract.

use crate::license::License;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the license data behind a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    Cloud,
    Offline,
    DatabaseOnly,
    Cache,
    None,
    Error,
}

impl ValidationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationSource::Cloud => "cloud",
            ValidationSource::Offline => "offline",
            ValidationSource::DatabaseOnly => "database_only",
            ValidationSource::Cache => "cache",
            ValidationSource::None => "none",
            ValidationSource::Error => "error",
        }
    }

    /// Trust order: cloud > offline > database_only > cache > none/error.
    pub fn trust_rank(&self) -> u8 {
        match self {
            ValidationSource::Cloud => 5,
            ValidationSource::Offline => 4,
            ValidationSource::DatabaseOnly => 3,
            ValidationSource::Cache => 2,
            ValidationSource::None | ValidationSource::Error => 0,
        }
    }

    pub fn max_trust(self, other: Self) -> Self {
        if other.trust_rank() > self.trust_rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ValidationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Expired,
    NoLicense,
    Error,
}

/// Named steps of the validation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    FormatValidation,
    ObviousInvalidCheck,
    LocalIntegrity,
    ExpiryCheck,
    CloudValidation,
}

impl Check {
    /// Critical checks invalidate the result in every mode.
    pub fn is_critical(&self) -> bool {
        matches!(self, Check::FormatValidation | Check::ObviousInvalidCheck)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Check::FormatValidation => "format_validation",
            Check::ObviousInvalidCheck => "obvious_invalid_check",
            Check::LocalIntegrity => "local_integrity",
            Check::ExpiryCheck => "expiry_check",
            Check::CloudValidation => "cloud_validation",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the comprehensive validation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The license may be used.
    pub valid: bool,
    /// Summary status.
    pub status: ValidationStatus,
    /// Highest-trust source that produced the license data.
    pub validation_source: ValidationSource,
    /// Checks in the order they ran.
    pub checks_performed: Vec<Check>,
    /// Checks that passed.
    pub checks_passed: Vec<Check>,
    /// Checks that failed.
    pub checks_failed: Vec<Check>,
    /// Non-fatal findings for the user.
    pub warnings: Vec<String>,
    /// Diagnostic chain (store and network errors, in order).
    #[serde(default)]
    pub errors: Vec<String>,
    /// Resolved license, if any source produced one.
    pub license_data: Option<License>,
    /// When the pipeline ran.
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: false,
            status: ValidationStatus::Invalid,
            validation_source: ValidationSource::None,
            checks_performed: Vec::new(),
            checks_passed: Vec::new(),
            checks_failed: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            license_data: None,
            validated_at: Utc::now(),
        }
    }

    /// Appends a check outcome to the performed list and to passed/failed.
    pub fn record(&mut self, check: Check, passed: bool) {
        self.checks_performed.push(check);
        if passed {
            self.checks_passed.push(check);
        } else {
            self.checks_failed.push(check);
        }
    }

    /// Replaces an earlier outcome of `check`, keeping its place in the
    /// performed list.
    pub fn rerecord(&mut self, check: Check, passed: bool) {
        if !self.checks_performed.contains(&check) {
            return self.record(check, passed);
        }
        self.checks_passed.retain(|c| *c != check);
        self.checks_failed.retain(|c| *c != check);
        if passed {
            self.checks_passed.push(check);
        } else {
            self.checks_failed.push(check);
        }
    }

    pub fn failed(&self, check: Check) -> bool {
        self.checks_failed.contains(&check)
    }

    pub fn passed(&self, check: Check) -> bool {
        self.checks_passed.contains(&check)
    }

    pub fn critical_failure(&self) -> bool {
        self.checks_failed.iter().any(Check::is_critical)
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Enforces the result invariants: a critical failure or missing data
    /// always yields `valid == false`.
    pub fn seal(mut self) -> Self {
        if self.critical_failure() || self.license_data.is_none() {
            self.valid = false;
        }
        self
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_trust_order() {
        assert_eq!(
            ValidationSource::DatabaseOnly.max_trust(ValidationSource::Cloud),
            ValidationSource::Cloud
        );
        assert_eq!(
            ValidationSource::Offline.max_trust(ValidationSource::Cache),
            ValidationSource::Offline
        );
        assert!(ValidationSource::Cache.trust_rank() > ValidationSource::None.trust_rank());
    }

    #[test]
    fn test_seal_enforces_invariants() {
        let mut result = ValidationResult::new();
        result.valid = true;
        result.record(Check::FormatValidation, false);
        assert!(!result.seal().valid);

        let mut no_data = ValidationResult::new();
        no_data.valid = true;
        assert!(!no_data.seal().valid);
    }

    #[test]
    fn test_rerecord_replaces_outcome() {
        let mut result = ValidationResult::new();
        result.record(Check::ExpiryCheck, false);
        result.record(Check::CloudValidation, true);
        result.rerecord(Check::ExpiryCheck, true);

        assert_eq!(
            result.checks_performed,
            vec![Check::ExpiryCheck, Check::CloudValidation]
        );
        assert!(result.passed(Check::ExpiryCheck));
        assert!(!result.failed(Check::ExpiryCheck));
    }

    #[test]
    fn test_check_names_serialize_snake_case() {
        let json = serde_json::to_string(&vec![Check::ObviousInvalidCheck]).unwrap();
        assert_eq!(json, r#"["obvious_invalid_check"]"#);
    }
}
