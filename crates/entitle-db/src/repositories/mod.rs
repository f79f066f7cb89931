//! Repository implementations for SQLite.

mod license;

pub use license::SqliteLicenseStore;
