//! Test fixtures for creating sample licenses and machines.

use chrono::{Duration, Utc};
use entitle_core::license::{LicenseGrant, LicenseStatus, ProductType};
use entitle_licensing::{MachineIdentity, MachineInfo};

pub const PAID_KEY: &str = "ENT-2025-PAID-0001";
pub const SECOND_KEY: &str = "ENT-2025-PAID-0002";
pub const CUSTOMER: &str = "owner@example.com";

/// Factory for license grants.
pub struct LicenseFixture;

impl LicenseFixture {
    /// Yearly business license with a year left.
    pub fn paid(key: &str) -> LicenseGrant {
        LicenseGrant::new(key, CUSTOMER, ProductType::Business1y)
            .with_features(["export", "sync"])
            .expires_in_days(365)
    }

    /// Active license with `days` whole days left.
    pub fn expiring(key: &str, days: i64) -> LicenseGrant {
        LicenseGrant::new(key, CUSTOMER, ProductType::Personal1m)
            .expires_at(Utc::now() + Duration::days(days) + Duration::hours(1))
    }

    /// Status still `active` but past its date by `days` whole days.
    pub fn expired(key: &str, days: i64) -> LicenseGrant {
        LicenseGrant::new(key, CUSTOMER, ProductType::Personal1m)
            .expires_at(Utc::now() - Duration::days(days) - Duration::hours(1))
    }

    pub fn lifetime(key: &str) -> LicenseGrant {
        LicenseGrant::new(key, CUSTOMER, ProductType::Desktop)
    }

    pub fn suspended(key: &str) -> LicenseGrant {
        Self::paid(key).with_status(LicenseStatus::Suspended)
    }

    pub fn trial(key: &str, days_left: i64) -> LicenseGrant {
        LicenseGrant::new(key, "trial@trial.local", ProductType::trial(14))
            .expires_at(Utc::now() + Duration::days(days_left) + Duration::hours(1))
    }
}

/// Factory for machine identities with pinned attributes.
pub struct MachineFixture;

impl MachineFixture {
    pub fn identity(hostname: &str) -> MachineIdentity {
        MachineIdentity::from_info(Self::info(hostname))
    }

    pub fn info(hostname: &str) -> MachineInfo {
        MachineInfo {
            hostname: Some(hostname.to_string()),
            node_id: Some(0x0242_ac11_0002),
            os_name: Some("Ubuntu".to_string()),
            os_release: Some("24.04".to_string()),
            processor: Some("AMD Ryzen 7 7840U".to_string()),
        }
    }
}
