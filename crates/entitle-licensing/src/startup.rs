//! Launch-time license decision.

use chrono::{DateTime, Duration, Utc};
use entitle_core::config::LicensingConfig;
use entitle_core::license::{License, LicenseStatus};
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Expired,
    Suspended,
    Inactive,
}

/// What the local store says about the installation's license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LicenseState {
    Valid {
        license: License,
        days_remaining: Option<i64>,
    },
    Invalid {
        license: License,
        reason: InvalidReason,
    },
    NoLicense,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupAction {
    Continue,
    ContinueOffline,
    ShowLicenseInput,
    ShowGraceWarning,
    ShowExpiredWarning,
    ShowError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    Valid,
    ValidExpiring,
    GracePeriod,
    Expired,
    Invalid,
    NoLicense,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupDecision {
    /// What the application should do.
    pub action: StartupAction,
    /// License state behind the action.
    pub state: StartupState,
    /// The license server answered the probe.
    pub online: bool,
    /// Days left on the license or the grace window.
    pub days_remaining: Option<i64>,
    /// License the decision was made on.
    pub license: Option<License>,
    /// Text for the user.
    pub message: Option<String>,
}

impl StartupDecision {
    fn new(action: StartupAction, state: StartupState, online: bool) -> Self {
        Self {
            action,
            state,
            online,
            days_remaining: None,
            license: None,
            message: None,
        }
    }

    fn with_license(mut self, license: License) -> Self {
        self.license = Some(license);
        self
    }

    fn with_days(mut self, days: Option<i64>) -> Self {
        self.days_remaining = days;
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The application may start.
    pub fn allows_launch(&self) -> bool {
        matches!(
            self.action,
            StartupAction::Continue | StartupAction::ContinueOffline | StartupAction::ShowGraceWarning
        )
    }
}

/// When the license stopped being usable, as far as the grace window is
/// concerned. A row marked expired before its date counts from its last
/// successful validation; one with neither date has no grace.
fn expired_since(license: &License, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match license.expires_at {
        Some(expires_at) if now > expires_at => Some(expires_at),
        Some(expires_at) => license.last_validated_at.map(|at| at.min(expires_at)),
        None => None,
    }
}

/// Combines the stored license state with connectivity into one launch
/// decision. Offline problems fail open, online ones fail closed.
pub struct StartupChecker {
    store: Arc<dyn LicenseStore>,
    remote: Arc<dyn RemoteAuthority>,
    grace_period_days: i64,
    expiry_warning_days: i64,
}

impl StartupChecker {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        remote: Arc<dyn RemoteAuthority>,
        config: &LicensingConfig,
    ) -> Self {
        Self {
            store,
            remote,
            grace_period_days: config.grace_period_days,
            expiry_warning_days: config.expiry_warning_days,
        }
    }

    pub async fn get_license_status(&self) -> LicenseState {
        match self.classify().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not read license state");
                LicenseState::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn classify(&self) -> Result<LicenseState> {
        if let Some(license) = self.store.get_active_license().await? {
            let days_remaining = self.store.check_expiry(&license).days_remaining;
            return Ok(LicenseState::Valid {
                license,
                days_remaining,
            });
        }

        let Some(license) = self.store.get_latest_license().await? else {
            return Ok(LicenseState::NoLicense);
        };

        let reason = if self.store.check_expiry(&license).expired {
            InvalidReason::Expired
        } else {
            match license.status {
                LicenseStatus::Expired => InvalidReason::Expired,
                LicenseStatus::Suspended => InvalidReason::Suspended,
                LicenseStatus::Inactive | LicenseStatus::Active => InvalidReason::Inactive,
            }
        };
        Ok(LicenseState::Invalid { license, reason })
    }

    pub async fn check(&self) -> StartupDecision {
        let state = self.get_license_status().await;
        let online = self.remote.is_online().await;
        let decision = self.decide(state, online, Utc::now());

        info!(
            action = ?decision.action,
            state = ?decision.state,
            online,
            days_remaining = ?decision.days_remaining,
            "Startup license check"
        );
        decision
    }

    /// Pure decision table.
    pub fn decide(&self, state: LicenseState, online: bool, now: DateTime<Utc>) -> StartupDecision {
        let grace = Duration::days(self.grace_period_days);

        match state {
            LicenseState::NoLicense => {
                StartupDecision::new(StartupAction::ShowLicenseInput, StartupState::NoLicense, online)
            }
            LicenseState::Valid {
                license,
                days_remaining,
            } => {
                let expiring = days_remaining.is_some_and(|days| days <= self.expiry_warning_days);
                let state = if expiring {
                    StartupState::ValidExpiring
                } else {
                    StartupState::Valid
                };
                StartupDecision::new(StartupAction::Continue, state, online)
                    .with_days(days_remaining)
                    .with_license(license)
            }
            LicenseState::Invalid {
                license,
                reason: InvalidReason::Expired,
            } => {
                let expired_at = expired_since(&license, now);
                let days_expired = expired_at.map_or(0, |at| (now - at).num_days().max(0));
                let within_grace = expired_at.is_some_and(|at| now <= at + grace);

                if !online && within_grace {
                    let days_left = (self.grace_period_days - days_expired).max(0);
                    StartupDecision::new(StartupAction::ShowGraceWarning, StartupState::GracePeriod, online)
                        .with_days(Some(days_left))
                        .with_message(format!(
                            "license expired {days_expired} day(s) ago, {days_left} day(s) of offline grace left"
                        ))
                        .with_license(license)
                } else {
                    StartupDecision::new(StartupAction::ShowExpiredWarning, StartupState::Expired, online)
                        .with_message(format!("license expired {days_expired} day(s) ago"))
                        .with_license(license)
                }
            }
            LicenseState::Invalid { license, reason } => {
                let recently_validated = license
                    .last_validated_at
                    .is_some_and(|at| now - at <= grace);

                let action = if !online && recently_validated {
                    StartupAction::ContinueOffline
                } else {
                    StartupAction::ShowLicenseInput
                };
                let label = match reason {
                    InvalidReason::Suspended => "suspended",
                    _ => "not active",
                };
                StartupDecision::new(action, StartupState::Invalid, online)
                    .with_message(format!("license is {label}"))
                    .with_license(license)
            }
            LicenseState::Error { message } => {
                let action = if online {
                    StartupAction::ShowError
                } else {
                    StartupAction::ContinueOffline
                };
                StartupDecision::new(action, StartupState::Error, online).with_message(message)
            }
        }
    }
}
