//! Test infrastructure for Entitle.
//!
//! Scenario tests run the licensing components against an in-memory SQLite
//! store and a scripted [`FakeRemoteAuthority`].
//!
//! # Usage
//!
//! ```ignore
//! use entitle_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     let licensing = ctx.licensing("machine-a");
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,entitle_licensing=debug")),
        )
        .with_test_writer()
        .try_init();
}
