//! Test doubles for the licensing ports.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use entitle_core::license::{LicenseGrant, LicenseStatus};
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::remote::{
    ActivationCheck, ActivationReason, RemoteActivation, RemoteError, RemoteValidation,
    TrialEligibility, TrialGrant,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// How many times each remote operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub probe: u32,
    pub validate: u32,
    pub check_activation: u32,
    pub record_activation: u32,
    pub eligibility: u32,
    pub generate: u32,
}

impl CallCounts {
    /// Calls that would have reached the license server.
    pub fn network_calls(&self) -> u32 {
        self.validate + self.check_activation + self.record_activation + self.eligibility + self.generate
    }
}

#[derive(Default)]
struct FakeState {
    online: bool,
    licenses: HashMap<String, LicenseGrant>,
    holders: HashMap<String, RemoteActivation>,
    trials_issued: HashSet<String>,
    trial_days: i64,
    fail_trial_generation: bool,
    calls: CallCounts,
}

/// In-memory license server.
///
/// Knows a set of licenses, tracks which machine holds each one and issues
/// one trial per machine. When offline every call fails as unreachable,
/// except `validate_license`, which falls back to the attached store the
/// way the HTTP adapter does. Clients made with [`Self::sharing_server`]
/// see the same server but keep their own fallback store.
pub struct FakeRemoteAuthority {
    state: Arc<Mutex<FakeState>>,
    fallback: Option<Arc<dyn LicenseStore>>,
}

impl Default for FakeRemoteAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemoteAuthority {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                online: true,
                trial_days: 14,
                ..Default::default()
            })),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, store: Arc<dyn LicenseStore>) -> Self {
        self.fallback = Some(store);
        self
    }

    /// Another machine's client of this server, falling back to `store`.
    pub fn sharing_server(&self, store: Arc<dyn LicenseStore>) -> Self {
        Self {
            state: self.state.clone(),
            fallback: Some(store),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake remote state poisoned")
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Make the server know `grant`.
    pub fn issue(&self, grant: LicenseGrant) {
        self.state().licenses.insert(grant.license_key.clone(), grant);
    }

    pub fn set_status(&self, key: &str, status: LicenseStatus) {
        if let Some(grant) = self.state().licenses.get_mut(key) {
            grant.status = status;
        }
    }

    /// Record `fingerprint` as the server-side holder of `key`.
    pub fn bind(&self, key: &str, fingerprint: &str) {
        self.state().holders.insert(
            key.to_string(),
            RemoteActivation {
                machine_fingerprint: fingerprint.to_string(),
                activation_time: Some(Utc::now() - Duration::days(2)),
                device_info: serde_json::json!({ "hostname": "other-desk" }),
            },
        );
    }

    pub fn release(&self, key: &str) {
        self.state().holders.remove(key);
    }

    pub fn holder(&self, key: &str) -> Option<String> {
        self.state()
            .holders
            .get(key)
            .map(|h| h.machine_fingerprint.clone())
    }

    pub fn mark_trial_used(&self, machine_id: &str) {
        self.state().trials_issued.insert(machine_id.to_string());
    }

    pub fn fail_trial_generation(&self) {
        self.state().fail_trial_generation = true;
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Fails with `Unreachable` when offline.
    fn reachable(&self) -> Result<MutexGuard<'_, FakeState>, RemoteError> {
        let state = self.state();
        if state.online {
            Ok(state)
        } else {
            Err(RemoteError::Unreachable {
                attempts: 3,
                errors: vec!["connection refused".to_string()],
            })
        }
    }
}

fn usable(grant: &LicenseGrant, now: DateTime<Utc>) -> bool {
    grant.status == LicenseStatus::Active && grant.expires_at.is_none_or(|at| now <= at)
}

#[async_trait]
impl RemoteAuthority for FakeRemoteAuthority {
    async fn is_online(&self) -> bool {
        let mut state = self.state();
        state.calls.probe += 1;
        state.online
    }

    async fn validate_license(&self, key: &str) -> RemoteValidation {
        let answer = {
            let mut state = self.state();
            state.calls.validate += 1;
            state.online.then(|| state.licenses.get(key).cloned())
        };

        match answer {
            Some(Some(grant)) => {
                let valid = usable(&grant, Utc::now());
                let message = (!valid).then(|| format!("license is {}", grant.status));
                RemoteValidation::cloud(valid, valid.then_some(grant), message)
            }
            Some(None) => RemoteValidation::cloud(false, None, Some("license not found".to_string())),
            None => {
                let mut errors = vec!["license server unreachable".to_string()];
                let cached = match &self.fallback {
                    Some(store) => match store.get_license_by_key(key).await {
                        Ok(cached) => cached,
                        Err(e) => {
                            errors.push(e.to_string());
                            None
                        }
                    },
                    None => None,
                };
                let valid = cached.as_ref().is_some_and(|l| l.is_usable(Utc::now()));
                RemoteValidation::offline(cached, valid, errors)
            }
        }
    }

    async fn check_activation(
        &self,
        key: &str,
        fingerprint: &str,
    ) -> Result<ActivationCheck, RemoteError> {
        let mut state = self.reachable()?;
        state.calls.check_activation += 1;

        let refused = |reason| ActivationCheck {
            can_activate: false,
            reason,
            license_data: None,
            existing_activation: None,
        };

        let Some(grant) = state.licenses.get(key).cloned() else {
            return Ok(refused(ActivationReason::LicenseNotFound));
        };
        if grant.status == LicenseStatus::Expired
            || grant.expires_at.is_some_and(|at| Utc::now() > at)
        {
            return Ok(refused(ActivationReason::LicenseExpired));
        }
        if grant.status == LicenseStatus::Suspended {
            return Ok(refused(ActivationReason::LicenseInactive));
        }

        let check = match state.holders.get(key) {
            Some(holder) if holder.machine_fingerprint == fingerprint => ActivationCheck {
                can_activate: true,
                reason: ActivationReason::SameMachineReactivation,
                license_data: Some(grant),
                existing_activation: None,
            },
            Some(holder) => ActivationCheck {
                can_activate: false,
                reason: ActivationReason::AlreadyActivatedOnAnotherDevice,
                license_data: None,
                existing_activation: Some(holder.clone()),
            },
            None => ActivationCheck {
                can_activate: true,
                reason: ActivationReason::NewActivation,
                license_data: Some(grant),
                existing_activation: None,
            },
        };
        Ok(check)
    }

    async fn record_activation(
        &self,
        key: &str,
        fingerprint: &str,
        device_info: &serde_json::Value,
    ) -> Result<(), RemoteError> {
        let mut state = self.reachable()?;
        state.calls.record_activation += 1;

        if let Some(holder) = state.holders.get(key) {
            if holder.machine_fingerprint != fingerprint {
                return Err(RemoteError::Refused(
                    "license is already activated on another device".to_string(),
                ));
            }
        }
        state.holders.insert(
            key.to_string(),
            RemoteActivation {
                machine_fingerprint: fingerprint.to_string(),
                activation_time: Some(Utc::now()),
                device_info: device_info.clone(),
            },
        );
        Ok(())
    }

    async fn check_trial_eligibility(
        &self,
        machine_id: &str,
    ) -> Result<TrialEligibility, RemoteError> {
        let mut state = self.reachable()?;
        state.calls.eligibility += 1;

        if state.trials_issued.contains(machine_id) {
            Ok(TrialEligibility {
                eligible: false,
                reason: Some("trial_already_used".to_string()),
                message: Some("a trial was already issued to this machine".to_string()),
            })
        } else {
            Ok(TrialEligibility {
                eligible: true,
                reason: None,
                message: None,
            })
        }
    }

    async fn generate_trial_license(&self, machine_id: &str) -> Result<TrialGrant, RemoteError> {
        let mut state = self.reachable()?;
        state.calls.generate += 1;

        if state.fail_trial_generation {
            return Err(RemoteError::Server {
                status: 500,
                message: "trial service unavailable".to_string(),
            });
        }

        state.trials_issued.insert(machine_id.to_string());
        let hint: String = machine_id.chars().take(8).collect();
        Ok(TrialGrant {
            trial_license_key: format!("TRIAL-{}-{:04}", hint.to_uppercase(), state.trials_issued.len()),
            expires_at: Utc::now() + Duration::days(state.trial_days),
            features: ["basic".to_string()].into_iter().collect(),
            customer_email: None,
        })
    }
}
