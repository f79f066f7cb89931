//! License records, grants and expiry evaluation.

use crate::activation::Activation;
use crate::ids::LicenseId;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Product line a license was issued for.
///
/// Unknown product strings are kept verbatim so a newer server can issue
/// products this build does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProductType {
    Personal1m,
    Personal1y,
    Business1m,
    Business1y,
    Trial { days: u32 },
    Desktop,
    Other(String),
}

impl ProductType {
    pub fn trial(days: u32) -> Self {
        ProductType::Trial { days }
    }

    pub fn is_trial(&self) -> bool {
        match self {
            ProductType::Trial { .. } => true,
            ProductType::Other(s) => s.starts_with("trial"),
            _ => false,
        }
    }

    pub fn is_paid(&self) -> bool {
        !self.is_trial()
    }
}

impl From<String> for ProductType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "personal_1m" => ProductType::Personal1m,
            "personal_1y" => ProductType::Personal1y,
            "business_1m" => ProductType::Business1m,
            "business_1y" => ProductType::Business1y,
            "desktop" => ProductType::Desktop,
            other => other
                .strip_prefix("trial_")
                .and_then(|rest| rest.strip_suffix('d'))
                .and_then(|days| days.parse().ok())
                .map(|days| ProductType::Trial { days })
                .unwrap_or(ProductType::Other(s)),
        }
    }
}

impl From<&str> for ProductType {
    fn from(s: &str) -> Self {
        ProductType::from(s.to_string())
    }
}

impl From<ProductType> for String {
    fn from(p: ProductType) -> Self {
        p.to_string()
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Personal1m => f.write_str("personal_1m"),
            ProductType::Personal1y => f.write_str("personal_1y"),
            ProductType::Business1m => f.write_str("business_1m"),
            ProductType::Business1y => f.write_str("business_1y"),
            ProductType::Trial { days } => write!(f, "trial_{}d", days),
            ProductType::Desktop => f.write_str("desktop"),
            ProductType::Other(s) => f.write_str(s),
        }
    }
}

/// Lifecycle status of a license row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Expired,
    Suspended,
}

impl LicenseStatus {
    pub const ALL: [LicenseStatus; 4] = [
        LicenseStatus::Active,
        LicenseStatus::Inactive,
        LicenseStatus::Expired,
        LicenseStatus::Suspended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Inactive => "inactive",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LicenseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LicenseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidLicenseData(format!("unknown license status: {s}")))
    }
}

/// A license as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    /// Local row id.
    pub id: LicenseId,
    /// Key as issued, unique.
    pub license_key: String,
    /// Purchaser email.
    pub customer_email: String,
    /// Product tier.
    pub product_type: ProductType,
    /// Enabled feature flags.
    #[serde(default)]
    pub features: BTreeSet<String>,
    /// Lifecycle status.
    pub status: LicenseStatus,
    /// `None` means a lifetime license.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the row was first stored.
    pub created_at: DateTime<Utc>,
    /// First successful activation on this machine.
    pub activated_at: Option<DateTime<Utc>>,
    /// Last successful confirmation by the remote authority.
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl License {
    /// Builds a license that has not been persisted yet.
    pub fn from_grant(grant: &LicenseGrant, id: LicenseId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            license_key: grant.license_key.clone(),
            customer_email: grant.customer_email.clone(),
            product_type: grant.product_type.clone(),
            features: grant.features.clone(),
            status: grant.status,
            expires_at: grant.expires_at,
            created_at,
            activated_at: None,
            last_validated_at: None,
        }
    }

    pub fn check_expiry(&self, now: DateTime<Utc>) -> ExpiryCheck {
        check_expiry(self.expires_at, now)
    }

    pub fn is_trial(&self) -> bool {
        self.product_type.is_trial()
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Active status and not past its expiry date.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == LicenseStatus::Active && self.check_expiry(now).valid
    }

    pub fn key_prefix(&self) -> &str {
        key_prefix(&self.license_key)
    }
}

/// First eight characters of a key, the only part of a key written to logs.
pub fn key_prefix(key: &str) -> &str {
    key.char_indices()
        .nth(8)
        .map(|(idx, _)| &key[..idx])
        .unwrap_or(key)
}

/// License data issued by the remote authority or supplied by a caller,
/// before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseGrant {
    /// Key as issued.
    pub license_key: String,
    /// Purchaser email.
    pub customer_email: String,
    /// Product tier.
    pub product_type: ProductType,
    /// Enabled feature flags.
    #[serde(default)]
    pub features: BTreeSet<String>,
    /// Status; `active` when omitted.
    #[serde(default = "default_grant_status")]
    pub status: LicenseStatus,
    /// Expiry; `None` for lifetime licenses.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_grant_status() -> LicenseStatus {
    LicenseStatus::Active
}

impl LicenseGrant {
    pub fn new(
        license_key: impl Into<String>,
        customer_email: impl Into<String>,
        product_type: impl Into<ProductType>,
    ) -> Self {
        Self {
            license_key: license_key.into(),
            customer_email: customer_email.into(),
            product_type: product_type.into(),
            features: BTreeSet::new(),
            status: default_grant_status(),
            expires_at: None,
        }
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: LicenseStatus) -> Self {
        self.status = status;
        self
    }

    pub fn expires_in_days(mut self, days: i64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::days(days));
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Required fields must be non-blank.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("license_key", self.license_key.trim().is_empty()),
            ("customer_email", self.customer_email.trim().is_empty()),
            ("product_type", self.product_type.to_string().trim().is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidLicenseData(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Outcome of comparing a license's expiry date against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryCheck {
    /// Not past the expiry date.
    pub valid: bool,
    /// Past the expiry date.
    pub expired: bool,
    /// Whole days left, for dated unexpired licenses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    /// Whole days since expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_expired: Option<i64>,
}

impl ExpiryCheck {
    pub fn lifetime() -> Self {
        Self {
            valid: true,
            expired: false,
            days_remaining: None,
            days_expired: None,
        }
    }

    pub fn is_lifetime(&self) -> bool {
        self.valid && self.days_remaining.is_none()
    }
}

/// Strict comparison: a license expires the instant `now` passes `expires_at`.
/// Day counts are whole elapsed days.
pub fn check_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ExpiryCheck {
    let Some(expires_at) = expires_at else {
        return ExpiryCheck::lifetime();
    };

    if now > expires_at {
        ExpiryCheck {
            valid: false,
            expired: true,
            days_remaining: None,
            days_expired: Some((now - expires_at).num_days()),
        }
    } else {
        ExpiryCheck {
            valid: true,
            expired: false,
            days_remaining: Some((expires_at - now).num_days()),
            days_expired: None,
        }
    }
}

/// Result of re-reading a license row and its latest activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub license: Option<License>,
    pub latest_activation: Option<Activation>,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn not_found(key: &str) -> Self {
        Self {
            valid: false,
            license: None,
            latest_activation: None,
            issues: vec![format!("license {} not found locally", key_prefix(key))],
        }
    }
}

/// Aggregate counts over the local license table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseStatistics {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
}

impl LicenseStatistics {
    /// Tallies rows using [`check_expiry`], so an `active` row past its date
    /// counts as expired and never as active. Rows with an unknown status
    /// (`None`) only count toward the total.
    pub fn tally<I>(rows: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (Option<LicenseStatus>, Option<DateTime<Utc>>)>,
    {
        rows.into_iter()
            .fold(Self::default(), |mut stats, (status, expires_at)| {
                stats.total += 1;
                let expired_by_date = check_expiry(expires_at, now).expired;
                match status {
                    Some(LicenseStatus::Active) if expired_by_date => stats.expired += 1,
                    Some(LicenseStatus::Active) => stats.active += 1,
                    Some(LicenseStatus::Expired) => stats.expired += 1,
                    _ => {}
                }
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_product_type_parsing() {
        assert_eq!(ProductType::from("business_1y"), ProductType::Business1y);
        assert_eq!(ProductType::from("trial_14d"), ProductType::trial(14));
        assert_eq!(ProductType::trial(7).to_string(), "trial_7d");
        assert_eq!(
            ProductType::from("enterprise"),
            ProductType::Other("enterprise".into())
        );
        assert!(ProductType::from("trial").is_trial());
        assert!(ProductType::Desktop.is_paid());
    }

    #[test]
    fn test_status_rejects_unknown_values() {
        assert_eq!("suspended".parse::<LicenseStatus>().unwrap(), LicenseStatus::Suspended);
        assert!("revoked".parse::<LicenseStatus>().is_err());
        assert!("Active".parse::<LicenseStatus>().is_err());
    }

    #[test]
    fn test_expired_yesterday() {
        let now = Utc::now();
        let check = check_expiry(Some(now - Duration::days(1)), now);
        assert!(check.expired);
        assert!(!check.valid);
        assert_eq!(check.days_expired, Some(1));
    }

    #[test]
    fn test_null_expiry_is_lifetime() {
        let check = check_expiry(None, Utc::now());
        assert!(check.valid);
        assert!(!check.expired);
        assert!(check.is_lifetime());
    }

    #[test]
    fn test_expiry_boundary_is_strict() {
        let now = Utc::now();
        assert!(check_expiry(Some(now), now).valid);
        assert!(check_expiry(Some(now - Duration::seconds(1)), now).expired);
    }

    #[test]
    fn test_days_remaining_counts_whole_days() {
        let now = Utc::now();
        let check = check_expiry(Some(now + Duration::days(30) + Duration::hours(5)), now);
        assert_eq!(check.days_remaining, Some(30));
    }

    #[test]
    fn test_statistics_never_double_count() {
        let now = Utc::now();
        let rows = vec![
            (Some(LicenseStatus::Active), None),
            (Some(LicenseStatus::Active), Some(now + Duration::days(3))),
            (Some(LicenseStatus::Active), Some(now - Duration::days(3))),
            (Some(LicenseStatus::Expired), Some(now - Duration::days(40))),
            (Some(LicenseStatus::Suspended), None),
            (None, None),
        ];
        let stats = LicenseStatistics::tally(rows, now);
        assert_eq!(
            stats,
            LicenseStatistics {
                total: 6,
                active: 2,
                expired: 2
            }
        );
    }

    #[test]
    fn test_grant_validation_lists_missing_fields() {
        let err = LicenseGrant::new(" ", "", "desktop").validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("license_key"));
        assert!(msg.contains("customer_email"));
        assert!(!msg.contains("product_type"));
    }

    #[test]
    fn test_key_prefix_is_char_safe() {
        assert_eq!(key_prefix("ABCDEFGHIJKL"), "ABCDEFGH");
        assert_eq!(key_prefix("ÄÖÜ"), "ÄÖÜ");
    }
}
