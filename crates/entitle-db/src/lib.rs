//! SQLite database layer for Entitle.

pub mod repositories;

pub use repositories::*;

use chrono::{DateTime, SecondsFormat, Utc};
use entitle_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// Columns the store reads and writes, per table.
const EXPECTED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "licenses",
        &[
            "id",
            "license_key",
            "customer_email",
            "product_type",
            "features",
            "status",
            "expires_at",
            "activated_at",
            "last_validated_at",
            "created_at",
        ],
    ),
    (
        "license_activations",
        &[
            "id",
            "license_id",
            "machine_fingerprint",
            "activation_time",
            "status",
            "device_info",
        ],
    ),
];

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database, creating the file if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Database(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(url = %database_url, "Connected to license database");
        Ok(Self { pool })
    }

    /// Private in-memory database. The single connection is never recycled,
    /// otherwise the data would vanish with it.
    pub async fn memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Database(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Fails with a `Database` error naming every expected column that is absent.
    pub async fn verify_schema(&self) -> Result<()> {
        let mut missing = Vec::new();

        for (table, columns) in EXPECTED_COLUMNS {
            let rows = sqlx::query("SELECT name FROM pragma_table_info(?1)")
                .bind(*table)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

            let present: HashSet<String> = rows
                .iter()
                .filter_map(|r| r.try_get::<String, _>("name").ok())
                .collect();

            missing.extend(
                columns
                    .iter()
                    .filter(|column| !present.contains(**column))
                    .map(|column| format!("{table}.{column}")),
            );
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Database(format!(
                "schema is missing columns: {}",
                missing.join(", ")
            )))
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Column form of a timestamp. Fixed precision keeps text order equal to time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrated_schema_verifies() {
        let db = Database::memory().await.unwrap();
        db.migrate().await.unwrap();
        db.verify_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_schema_names_missing_columns() {
        let db = Database::memory().await.unwrap();
        sqlx::query("CREATE TABLE licenses (id TEXT PRIMARY KEY, license_key TEXT)")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.verify_schema().await.unwrap_err().to_string();
        assert!(err.contains("licenses.customer_email"));
        assert!(err.contains("license_activations.device_info"));
        assert!(!err.contains("licenses.license_key"));
    }

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("license.db").display());

        let db = Database::connect(&url).await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;

        let reopened = Database::connect(&url).await.unwrap();
        reopened.migrate().await.unwrap();
        reopened.verify_schema().await.unwrap();
    }

    #[test]
    fn test_timestamp_text_orders_like_time() {
        let early = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 3, 1, 9, 30, 0).unwrap();
        let late = early + chrono::Duration::microseconds(5);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(parse_timestamp(&format_timestamp(early)), Some(early));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
