//! Licensing components wired together.

use crate::activation::{ActivationManager, ActivationOutcome};
use crate::cloud::HttpRemoteAuthority;
use crate::engine::ValidationEngine;
use crate::machine::MachineIdentity;
use crate::startup::{StartupChecker, StartupDecision};
use crate::trial::{TrialService, TrialStatus};
use entitle_core::Result;
use entitle_core::config::LicensingConfig;
use entitle_core::ports::{LicenseStore, RemoteAuthority};
use entitle_core::validation::ValidationResult;
use entitle_db::{Database, SqliteLicenseStore};
use std::sync::Arc;
use tracing::info;

/// Owns one instance of every licensing component.
pub struct LicensingContext {
    config: LicensingConfig,
    database: Option<Database>,
    store: Arc<dyn LicenseStore>,
    remote: Arc<dyn RemoteAuthority>,
    identity: MachineIdentity,
    engine: ValidationEngine,
    activation: ActivationManager,
    trials: TrialService,
    startup: StartupChecker,
}

impl LicensingContext {
    /// Connect the store, run migrations, verify the schema and build the
    /// components against the configured license server.
    pub async fn open(config: LicensingConfig) -> Result<Self> {
        config.validate()?;

        let database = Database::connect(&config.database_url).await?;
        database.migrate().await?;
        database.verify_schema().await?;

        let store: Arc<dyn LicenseStore> = Arc::new(SqliteLicenseStore::new(database.pool().clone()));
        let remote: Arc<dyn RemoteAuthority> = Arc::new(
            HttpRemoteAuthority::new(config.cloud.clone()).with_fallback(store.clone()),
        );

        let identity = MachineIdentity::detect();
        info!(
            database = %config.database_url,
            api = %config.cloud.api_url,
            fingerprint = %identity.fingerprint(),
            "Licensing context opened"
        );

        let mut context = Self::with_components(config, store, remote, identity);
        context.database = Some(database);
        Ok(context)
    }

    /// Build the components over caller-supplied adapters.
    pub fn with_components(
        config: LicensingConfig,
        store: Arc<dyn LicenseStore>,
        remote: Arc<dyn RemoteAuthority>,
        identity: MachineIdentity,
    ) -> Self {
        Self {
            engine: ValidationEngine::new(store.clone(), remote.clone(), &config),
            activation: ActivationManager::new(store.clone(), remote.clone(), &config, identity.clone()),
            trials: TrialService::new(store.clone(), remote.clone()),
            startup: StartupChecker::new(store.clone(), remote.clone(), &config),
            database: None,
            config,
            store,
            remote,
            identity,
        }
    }

    pub async fn validate(&self, key: &str, strict_mode: bool, force_online: bool) -> ValidationResult {
        self.engine.validate_comprehensive(key, strict_mode, force_online).await
    }

    pub async fn activate(&self, key: &str, force_offline: bool) -> ActivationOutcome {
        self.activation.activate(key, force_offline).await
    }

    /// Trial status for this machine.
    pub async fn trial(&self) -> TrialStatus {
        self.trials.check_or_create_trial(self.identity.fingerprint()).await
    }

    pub async fn startup(&self) -> StartupDecision {
        self.startup.check().await
    }

    pub fn config(&self) -> &LicensingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LicenseStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteAuthority> {
        &self.remote
    }

    pub fn identity(&self) -> &MachineIdentity {
        &self.identity
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    pub fn activation(&self) -> &ActivationManager {
        &self.activation
    }

    pub fn trials(&self) -> &TrialService {
        &self.trials
    }

    pub fn startup_checker(&self) -> &StartupChecker {
        &self.startup
    }

    /// Drain the connection pool, if this context opened one.
    pub async fn close(self) {
        if let Some(database) = self.database {
            database.close().await;
            info!("Licensing context closed");
        }
    }
}
