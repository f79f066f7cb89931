//! Test context wiring an in-memory store to the fake license server.

use crate::fixtures::MachineFixture;
use crate::helpers::FakeRemoteAuthority;
use entitle_core::config::LicensingConfig;
use entitle_core::license::LicenseGrant;
use entitle_core::ports::LicenseStore;
use entitle_db::{Database, SqliteLicenseStore};
use entitle_licensing::LicensingContext;
use std::sync::Arc;

/// One machine's local database plus a shared fake license server.
pub struct TestContext {
    pub db: Database,
    pub store: Arc<SqliteLicenseStore>,
    pub remote: Arc<FakeRemoteAuthority>,
    pub config: LicensingConfig,
}

impl TestContext {
    /// Fresh migrated in-memory database and an online license server.
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let db = Database::memory().await?;
        db.migrate().await?;

        let store = Arc::new(SqliteLicenseStore::new(db.pool().clone()));
        let remote = Arc::new(FakeRemoteAuthority::new().with_fallback(store.clone()));

        Ok(Self {
            db,
            store,
            remote,
            config: LicensingConfig::default(),
        })
    }

    /// Same server, separate local database (a second machine). Offline
    /// fallbacks read this machine's database only.
    pub async fn second_machine(&self) -> anyhow::Result<Self> {
        let db = Database::memory().await?;
        db.migrate().await?;
        let store = Arc::new(SqliteLicenseStore::new(db.pool().clone()));
        let remote = Arc::new(self.remote.sharing_server(store.clone()));

        Ok(Self {
            db,
            store,
            remote,
            config: self.config.clone(),
        })
    }

    /// Licensing components for the machine named `hostname`.
    pub fn licensing(&self, hostname: &str) -> LicensingContext {
        LicensingContext::with_components(
            self.config.clone(),
            self.store.clone(),
            self.remote.clone(),
            MachineFixture::identity(hostname),
        )
    }

    /// Store `grant` locally only.
    pub async fn seed_local(&self, grant: &LicenseGrant) -> anyhow::Result<()> {
        self.store.create_license(grant).await?;
        Ok(())
    }

    /// Store `grant` locally and on the license server.
    pub async fn seed(&self, grant: LicenseGrant) -> anyhow::Result<()> {
        self.seed_local(&grant).await?;
        self.remote.issue(grant);
        Ok(())
    }
}
