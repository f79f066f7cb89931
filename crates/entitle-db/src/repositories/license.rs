//! SQLite implementation of LicenseStore.

use crate::{format_timestamp, parse_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entitle_core::activation::{Activation, ActivationState};
use entitle_core::ids::{ActivationId, LicenseId};
use entitle_core::license::{
    IntegrityReport, License, LicenseGrant, LicenseStatistics, LicenseStatus, ProductType,
    key_prefix,
};
use entitle_core::ports::LicenseStore;
use entitle_core::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tokio::sync::RwLock;

const LICENSE_COLUMNS: &str = "id, license_key, customer_email, product_type, features, status, \
     expires_at, activated_at, last_validated_at, created_at";

const ACTIVATION_COLUMNS: &str =
    "id, license_id, machine_fingerprint, activation_time, status, device_info";

/// SQLite implementation of LicenseStore.
///
/// Reads share the lock and writes take it exclusively, one logical
/// operation at a time.
pub struct SqliteLicenseStore {
    pool: SqlitePool,
    lock: RwLock<()>,
}

impl SqliteLicenseStore {
    /// Create a new SqliteLicenseStore.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: RwLock::new(()),
        }
    }

    async fn fetch_license(&self, filter: &str, bind: Option<&str>) -> Result<Vec<License>> {
        let sql = format!("SELECT {LICENSE_COLUMNS} FROM licenses {filter}");
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(row_to_license).collect()
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn optional_text(r: &SqliteRow, column: &str) -> Option<String> {
    r.try_get::<Option<String>, _>(column).ok().flatten()
}

/// Optional timestamp column; malformed text decodes as `None`.
fn optional_timestamp(r: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    let raw = optional_text(r, column)?;
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        tracing::warn!(column, value = %raw, "Unparseable timestamp in license database");
    }
    parsed
}

fn required_timestamp(r: &SqliteRow, column: &str) -> DateTime<Utc> {
    optional_timestamp(r, column).unwrap_or_default()
}

fn parse_features(raw: Option<String>) -> BTreeSet<String> {
    let Some(raw) = raw else {
        return BTreeSet::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Corrupt features column, using an empty set");
        BTreeSet::new()
    })
}

fn parse_device_info(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|raw| match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) | Err(_) => {
            tracing::warn!("Corrupt device_info column, using an empty object");
            None
        }
    })
    .unwrap_or_else(|| serde_json::json!({}))
}

fn parse_id<T>(r: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = r.try_get(column).map_err(db_err)?;
    raw.parse()
        .map_err(|e| Error::Database(format!("bad {column} {raw:?}: {e}")))
}

fn row_to_license(r: &SqliteRow) -> Result<License> {
    let key = optional_text(r, "license_key").unwrap_or_default();
    let status_raw = optional_text(r, "status").unwrap_or_default();
    let status = status_raw.parse().unwrap_or_else(|_| {
        tracing::warn!(
            key = key_prefix(&key),
            status = %status_raw,
            "Unknown license status, treating as inactive"
        );
        LicenseStatus::Inactive
    });

    Ok(License {
        id: parse_id(r, "id")?,
        customer_email: optional_text(r, "customer_email").unwrap_or_default(),
        product_type: ProductType::from(optional_text(r, "product_type").unwrap_or_default()),
        features: parse_features(optional_text(r, "features")),
        status,
        expires_at: optional_timestamp(r, "expires_at"),
        created_at: required_timestamp(r, "created_at"),
        activated_at: optional_timestamp(r, "activated_at"),
        last_validated_at: optional_timestamp(r, "last_validated_at"),
        license_key: key,
    })
}

fn row_to_activation(r: &SqliteRow) -> Result<Activation> {
    let status = optional_text(r, "status")
        .as_deref()
        .and_then(ActivationState::parse)
        .unwrap_or(ActivationState::Deactivated);

    Ok(Activation {
        id: parse_id(r, "id")?,
        license_id: parse_id(r, "license_id")?,
        machine_fingerprint: optional_text(r, "machine_fingerprint").unwrap_or_default(),
        activation_time: required_timestamp(r, "activation_time"),
        status,
        device_info: parse_device_info(optional_text(r, "device_info")),
    })
}

fn features_json(grant: &LicenseGrant) -> Result<String> {
    Ok(serde_json::to_string(&grant.features)?)
}

#[async_trait]
impl LicenseStore for SqliteLicenseStore {
    async fn create_license(&self, grant: &LicenseGrant) -> Result<LicenseId> {
        grant.validate()?;
        let _guard = self.lock.write().await;

        let id = LicenseId::new();
        let now = Utc::now();

        let result = sqlx::query(
            r#"INSERT INTO licenses (id, license_key, customer_email, product_type, features, status, expires_at, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(id.to_db())
        .bind(&grant.license_key)
        .bind(&grant.customer_email)
        .bind(grant.product_type.to_string())
        .bind(features_json(grant)?)
        .bind(grant.status.as_str())
        .bind(grant.expires_at.map(format_timestamp))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    key = key_prefix(&grant.license_key),
                    product = %grant.product_type,
                    "License stored"
                );
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(Error::LicenseAlreadyExists(
                key_prefix(&grant.license_key).to_string(),
            )),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn sync_license(&self, grant: &LicenseGrant) -> Result<LicenseId> {
        grant.validate()?;
        let _guard = self.lock.write().await;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"INSERT INTO licenses (id, license_key, customer_email, product_type, features, status, expires_at, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT (license_key) DO UPDATE SET
                   customer_email = excluded.customer_email,
                   product_type = excluded.product_type,
                   features = excluded.features,
                   status = excluded.status,
                   expires_at = excluded.expires_at"#,
        )
        .bind(LicenseId::new().to_db())
        .bind(&grant.license_key)
        .bind(&grant.customer_email)
        .bind(grant.product_type.to_string())
        .bind(features_json(grant)?)
        .bind(grant.status.as_str())
        .bind(grant.expires_at.map(format_timestamp))
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query("SELECT id FROM licenses WHERE license_key = ?1")
            .bind(&grant.license_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let id = parse_id(&row, "id")?;

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(key = key_prefix(&grant.license_key), "License synced from cloud");
        Ok(id)
    }

    async fn get_license_by_key(&self, key: &str) -> Result<Option<License>> {
        let _guard = self.lock.read().await;
        let mut found = self
            .fetch_license("WHERE license_key = ?1", Some(key))
            .await?;
        Ok(found.pop())
    }

    async fn get_active_license(&self) -> Result<Option<License>> {
        let _guard = self.lock.read().await;
        let now = Utc::now();
        let candidates = self
            .fetch_license(
                "WHERE status = 'active' ORDER BY created_at DESC, id DESC",
                None,
            )
            .await?;

        Ok(candidates
            .into_iter()
            .find(|license| license.check_expiry(now).valid))
    }

    async fn get_active_paid_license(&self) -> Result<Option<License>> {
        let _guard = self.lock.read().await;
        let now = Utc::now();
        let candidates = self
            .fetch_license(
                "WHERE status = 'active' AND product_type NOT LIKE 'trial%' \
                 ORDER BY created_at DESC, id DESC",
                None,
            )
            .await?;

        Ok(candidates
            .into_iter()
            .find(|license| license.product_type.is_paid() && license.check_expiry(now).valid))
    }

    async fn get_latest_license(&self) -> Result<Option<License>> {
        let _guard = self.lock.read().await;
        let mut found = self
            .fetch_license("ORDER BY created_at DESC, id DESC LIMIT 1", None)
            .await?;
        Ok(found.pop())
    }

    async fn get_latest_trial(&self) -> Result<Option<License>> {
        let _guard = self.lock.read().await;
        let mut found = self
            .fetch_license(
                "WHERE product_type LIKE 'trial%' ORDER BY created_at DESC, id DESC LIMIT 1",
                None,
            )
            .await?;
        Ok(found.pop())
    }

    async fn update_license_status(&self, key: &str, status: &str) -> Result<bool> {
        let Ok(status) = status.parse::<LicenseStatus>() else {
            tracing::warn!(key = key_prefix(key), status, "Rejected unknown license status");
            return Ok(false);
        };
        let _guard = self.lock.write().await;

        let result = sqlx::query("UPDATE licenses SET status = ?1 WHERE license_key = ?2")
            .bind(status.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let updated = result.rows_affected() > 0;
        if updated {
            tracing::info!(key = key_prefix(key), %status, "License status updated");
        }
        Ok(updated)
    }

    async fn mark_activated(&self, key: &str, at: DateTime<Utc>) -> Result<bool> {
        let _guard = self.lock.write().await;
        let result = sqlx::query(
            "UPDATE licenses SET status = 'active', activated_at = ?1 WHERE license_key = ?2",
        )
        .bind(format_timestamp(at))
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_validated(&self, key: &str, at: DateTime<Utc>) -> Result<bool> {
        let _guard = self.lock.write().await;
        let result = sqlx::query("UPDATE licenses SET last_validated_at = ?1 WHERE license_key = ?2")
            .bind(format_timestamp(at))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn check_integrity(&self, key: &str) -> Result<IntegrityReport> {
        let _guard = self.lock.read().await;

        let row = sqlx::query(
            r#"SELECT l.id, l.license_key, l.customer_email, l.product_type, l.features, l.status,
                      l.expires_at, l.activated_at, l.last_validated_at, l.created_at,
                      a.id AS act_id, a.license_id AS act_license_id,
                      a.machine_fingerprint AS act_machine_fingerprint,
                      a.activation_time AS act_activation_time,
                      a.status AS act_status, a.device_info AS act_device_info
               FROM licenses l
               LEFT JOIN license_activations a ON a.id = (
                   SELECT id FROM license_activations
                   WHERE license_id = l.id
                   ORDER BY activation_time DESC, id DESC
                   LIMIT 1
               )
               WHERE TRIM(l.license_key) = TRIM(?1)
               LIMIT 1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(IntegrityReport::not_found(key));
        };

        let mut issues = Vec::new();

        let missing: Vec<&str> = ["license_key", "customer_email", "product_type"]
            .into_iter()
            .filter(|column| {
                optional_text(&row, column)
                    .map(|v| v.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect();
        if !missing.is_empty() {
            issues.push(format!("missing required fields: {}", missing.join(", ")));
        }

        let stored_key = optional_text(&row, "license_key").unwrap_or_default();
        if stored_key != key {
            issues.push(format!(
                "stored key {} does not match requested key {}",
                key_prefix(&stored_key),
                key_prefix(key)
            ));
        }

        let status = optional_text(&row, "status").unwrap_or_default();
        if status.parse::<LicenseStatus>().is_err() {
            issues.push(format!("unknown license status: {status:?}"));
        }

        if let Some(raw) = optional_text(&row, "expires_at") {
            if parse_timestamp(&raw).is_none() {
                issues.push(format!("unparseable expires_at: {raw:?}"));
            }
        }

        let latest_activation = match optional_text(&row, "act_id") {
            Some(act_id) => {
                let act_status = optional_text(&row, "act_status").unwrap_or_default();
                if ActivationState::parse(&act_status).is_none() {
                    issues.push(format!("unknown activation status: {act_status:?}"));
                }
                Some(Activation {
                    id: act_id
                        .parse::<ActivationId>()
                        .map_err(|e| Error::Database(e.to_string()))?,
                    license_id: parse_id(&row, "act_license_id")?,
                    machine_fingerprint: optional_text(&row, "act_machine_fingerprint")
                        .unwrap_or_default(),
                    activation_time: required_timestamp(&row, "act_activation_time"),
                    status: ActivationState::parse(&act_status)
                        .unwrap_or(ActivationState::Deactivated),
                    device_info: parse_device_info(optional_text(&row, "act_device_info")),
                })
            }
            None => None,
        };

        let license = row_to_license(&row)?;
        let valid = issues.is_empty();
        if !valid {
            tracing::warn!(key = key_prefix(key), ?issues, "License integrity check failed");
        }

        Ok(IntegrityReport {
            valid,
            license: Some(license),
            latest_activation,
            issues,
        })
    }

    async fn license_statistics(&self) -> Result<LicenseStatistics> {
        let _guard = self.lock.read().await;
        let rows = sqlx::query("SELECT status, expires_at FROM licenses")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let tallied = rows.iter().map(|r| {
            let status = optional_text(r, "status").and_then(|s| s.parse().ok());
            (status, optional_timestamp(r, "expires_at"))
        });
        Ok(LicenseStatistics::tally(tallied, Utc::now()))
    }

    async fn create_activation(
        &self,
        license_id: LicenseId,
        fingerprint: &str,
        device_info: &serde_json::Value,
    ) -> Result<ActivationId> {
        let _guard = self.lock.write().await;
        let device_json = serde_json::to_string(device_info)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let active = sqlx::query(&format!(
            "SELECT {ACTIVATION_COLUMNS} FROM license_activations \
             WHERE license_id = ?1 AND status = 'active' ORDER BY activation_time"
        ))
        .bind(license_id.to_db())
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?
        .iter()
        .map(row_to_activation)
        .collect::<Result<Vec<_>>>()?;

        if let Some(other) = active
            .iter()
            .find(|a| a.machine_fingerprint != fingerprint)
        {
            tracing::warn!(
                license_id = %license_id,
                holder = %other.fingerprint_hint(),
                "Activation refused, license is active on another machine"
            );
            return Err(Error::ActivationConflict {
                activated_at: other.activation_time,
            });
        }

        let id = if let Some(existing) = active.first() {
            sqlx::query("UPDATE license_activations SET device_info = ?1 WHERE id = ?2")
                .bind(&device_json)
                .bind(existing.id.to_db())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            existing.id
        } else {
            let id = ActivationId::new();
            sqlx::query(
                r#"INSERT INTO license_activations (id, license_id, machine_fingerprint, activation_time, status, device_info)
                   VALUES (?1, ?2, ?3, ?4, 'active', ?5)"#,
            )
            .bind(id.to_db())
            .bind(license_id.to_db())
            .bind(fingerprint)
            .bind(format_timestamp(Utc::now()))
            .bind(&device_json)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            id
        };

        tx.commit().await.map_err(db_err)?;

        tracing::info!(license_id = %license_id, activation_id = %id, "Activation recorded");
        Ok(id)
    }

    async fn find_activation(
        &self,
        license_id: LicenseId,
        fingerprint: &str,
    ) -> Result<Option<Activation>> {
        let _guard = self.lock.read().await;
        let row = sqlx::query(&format!(
            "SELECT {ACTIVATION_COLUMNS} FROM license_activations \
             WHERE license_id = ?1 AND machine_fingerprint = ?2 \
             ORDER BY status = 'active' DESC, activation_time DESC LIMIT 1"
        ))
        .bind(license_id.to_db())
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_activation).transpose()
    }

    async fn active_activations(&self, license_id: LicenseId) -> Result<Vec<Activation>> {
        let _guard = self.lock.read().await;
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVATION_COLUMNS} FROM license_activations \
             WHERE license_id = ?1 AND status = 'active' ORDER BY activation_time"
        ))
        .bind(license_id.to_db())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_activation).collect()
    }

    async fn deactivate(&self, license_id: LicenseId, fingerprint: &str) -> Result<bool> {
        let _guard = self.lock.write().await;
        let result = sqlx::query(
            "UPDATE license_activations SET status = 'deactivated' \
             WHERE license_id = ?1 AND machine_fingerprint = ?2 AND status = 'active'",
        )
        .bind(license_id.to_db())
        .bind(fingerprint)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_license(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.write().await;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "DELETE FROM license_activations \
             WHERE license_id IN (SELECT id FROM licenses WHERE license_key = ?1)",
        )
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let result = sqlx::query("DELETE FROM licenses WHERE license_key = ?1")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(key = key_prefix(key), "License removed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    async fn store() -> (Database, SqliteLicenseStore) {
        let db = Database::memory().await.unwrap();
        db.migrate().await.unwrap();
        let store = SqliteLicenseStore::new(db.pool().clone());
        (db, store)
    }

    fn grant(key: &str) -> LicenseGrant {
        LicenseGrant::new(key, "owner@example.com", "business_1y")
            .with_features(["export", "sync"])
            .expires_in_days(365)
    }

    #[tokio::test]
    async fn test_create_and_get_by_key() {
        let (_db, store) = store().await;
        let id = store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();

        let license = store
            .get_license_by_key("ENT-AAAA-BBBB-CCCC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(license.id, id);
        assert_eq!(license.status, LicenseStatus::Active);
        assert!(license.has_feature("sync"));
        assert!(store.get_license_by_key("ENT-MISSING-0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_blank_fields() {
        let (_db, store) = store().await;
        store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();

        let dup = store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await;
        assert!(matches!(dup, Err(Error::LicenseAlreadyExists(_))));

        let blank = LicenseGrant::new("ENT-DDDD-EEEE-FFFF", "  ", "desktop");
        assert!(matches!(
            store.create_license(&blank).await,
            Err(Error::InvalidLicenseData(_))
        ));
    }

    #[tokio::test]
    async fn test_active_license_is_newest_unexpired() {
        let (_db, store) = store().await;
        store.create_license(&grant("ENT-OLD0-0000-0001")).await.unwrap();
        store
            .create_license(
                &LicenseGrant::new("ENT-LAPSED-000002", "owner@example.com", "personal_1m")
                    .expires_at(Utc::now() - Duration::days(2)),
            )
            .await
            .unwrap();

        let active = store.get_active_license().await.unwrap().unwrap();
        assert_eq!(active.license_key, "ENT-OLD0-0000-0001");

        store.create_license(&grant("ENT-NEW0-0000-0003")).await.unwrap();
        let active = store.get_active_license().await.unwrap().unwrap();
        assert_eq!(active.license_key, "ENT-NEW0-0000-0003");

        let latest = store.get_latest_license().await.unwrap().unwrap();
        assert_eq!(latest.license_key, "ENT-NEW0-0000-0003");
    }

    #[tokio::test]
    async fn test_active_paid_license_skips_newer_trials() {
        let (_db, store) = store().await;
        store.create_license(&grant("ENT-PAID-0000-0001")).await.unwrap();
        store
            .create_license(
                &LicenseGrant::new("TRIAL-ABCD-0001", "t@trial.local", ProductType::trial(14))
                    .expires_in_days(10),
            )
            .await
            .unwrap();

        let active = store.get_active_license().await.unwrap().unwrap();
        assert_eq!(active.license_key, "TRIAL-ABCD-0001");
        let paid = store.get_active_paid_license().await.unwrap().unwrap();
        assert_eq!(paid.license_key, "ENT-PAID-0000-0001");

        store.update_license_status("ENT-PAID-0000-0001", "expired").await.unwrap();
        assert!(store.get_active_paid_license().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_rejects_unknown_values() {
        let (_db, store) = store().await;
        store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();

        assert!(!store.update_license_status("ENT-AAAA-BBBB-CCCC", "revoked").await.unwrap());
        assert!(!store.update_license_status("ENT-NOPE-NOPE-NOPE", "expired").await.unwrap());
        assert!(store.update_license_status("ENT-AAAA-BBBB-CCCC", "suspended").await.unwrap());

        let license = store.get_license_by_key("ENT-AAAA-BBBB-CCCC").await.unwrap().unwrap();
        assert_eq!(license.status, LicenseStatus::Suspended);
        assert!(store.get_active_license().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_license_upserts() {
        let (_db, store) = store().await;
        let first = store.sync_license(&grant("ENT-SYNC-0000-0001")).await.unwrap();

        let renewed = grant("ENT-SYNC-0000-0001")
            .with_features(["export", "sync", "api"])
            .expires_in_days(730);
        let second = store.sync_license(&renewed).await.unwrap();
        assert_eq!(first, second);

        let license = store.get_license_by_key("ENT-SYNC-0000-0001").await.unwrap().unwrap();
        assert!(license.has_feature("api"));
        assert_eq!(license.check_expiry(Utc::now()).days_remaining, Some(729));
    }

    #[tokio::test]
    async fn test_integrity_reports_corrupt_row() {
        let (db, store) = store().await;
        store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();

        let report = store.check_integrity("ENT-AAAA-BBBB-CCCC").await.unwrap();
        assert!(report.valid, "{:?}", report.issues);
        assert!(report.latest_activation.is_none());

        sqlx::query("UPDATE licenses SET status = 'revoked', expires_at = 'soon', customer_email = ''")
            .execute(db.pool())
            .await
            .unwrap();

        let report = store.check_integrity("ENT-AAAA-BBBB-CCCC").await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 3, "{:?}", report.issues);
        let license = report.license.unwrap();
        assert_eq!(license.expires_at, None);
        assert_eq!(license.status, LicenseStatus::Inactive);

        let missing = store.check_integrity("ENT-MISSING-0000").await.unwrap();
        assert!(!missing.valid);
        assert!(missing.license.is_none());
    }

    #[tokio::test]
    async fn test_integrity_includes_latest_activation() {
        let (db, store) = store().await;
        let id = store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();
        store
            .create_activation(id, "a".repeat(32).as_str(), &serde_json::json!({"os": "linux"}))
            .await
            .unwrap();

        let report = store.check_integrity("ENT-AAAA-BBBB-CCCC").await.unwrap();
        assert!(report.valid);
        let activation = report.latest_activation.unwrap();
        assert_eq!(activation.device_info["os"], "linux");

        sqlx::query("UPDATE license_activations SET status = 'paused'")
            .execute(db.pool())
            .await
            .unwrap();
        let report = store.check_integrity("ENT-AAAA-BBBB-CCCC").await.unwrap();
        assert!(!report.valid);
        assert!(report.issues[0].contains("activation status"));
    }

    #[tokio::test]
    async fn test_corrupt_json_columns_default() {
        let (db, store) = store().await;
        let id = store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();
        store
            .create_activation(id, "b".repeat(32).as_str(), &serde_json::json!({}))
            .await
            .unwrap();

        sqlx::query("UPDATE licenses SET features = '{not json'")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE license_activations SET device_info = '[1, 2'")
            .execute(db.pool())
            .await
            .unwrap();

        let license = store.get_license_by_key("ENT-AAAA-BBBB-CCCC").await.unwrap().unwrap();
        assert!(license.features.is_empty());
        let activations = store.active_activations(id).await.unwrap();
        assert_eq!(activations[0].device_info, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_single_machine_activation() {
        let (_db, store) = store().await;
        let id = store.create_license(&grant("ENT-AAAA-BBBB-CCCC")).await.unwrap();
        let first = "1".repeat(32);
        let second = "2".repeat(32);

        let act = store
            .create_activation(id, &first, &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        let again = store
            .create_activation(id, &first, &serde_json::json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(act, again);

        let conflict = store
            .create_activation(id, &second, &serde_json::json!({}))
            .await;
        assert!(matches!(conflict, Err(Error::ActivationConflict { .. })));

        let active = store.active_activations(id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].device_info["n"], 2);

        assert!(store.deactivate(id, &first).await.unwrap());
        store
            .create_activation(id, &second, &serde_json::json!({}))
            .await
            .unwrap();
        let holder = store.find_activation(id, &second).await.unwrap().unwrap();
        assert!(holder.is_active());
        let released = store.find_activation(id, &first).await.unwrap().unwrap();
        assert!(!released.is_active());
    }

    #[tokio::test]
    async fn test_statistics_match_expiry_rules() {
        let (_db, store) = store().await;
        store.create_license(&grant("ENT-LIVE-0000-0001")).await.unwrap();
        store
            .create_license(&LicenseGrant::new("ENT-LIFE-0000-0002", "a@b.c", "desktop"))
            .await
            .unwrap();
        store
            .create_license(
                &LicenseGrant::new("ENT-PAST-0000-0003", "a@b.c", "personal_1m")
                    .expires_at(Utc::now() - Duration::days(1)),
            )
            .await
            .unwrap();
        store
            .create_license(
                &LicenseGrant::new("ENT-GONE-0000-0004", "a@b.c", "personal_1m")
                    .with_status(LicenseStatus::Expired),
            )
            .await
            .unwrap();

        let stats = store.license_statistics().await.unwrap();
        assert_eq!(
            stats,
            LicenseStatistics {
                total: 4,
                active: 2,
                expired: 2
            }
        );
    }

    #[tokio::test]
    async fn test_latest_trial_and_delete() {
        let (_db, store) = store().await;
        store.create_license(&grant("ENT-PAID-0000-0001")).await.unwrap();
        assert!(store.get_latest_trial().await.unwrap().is_none());

        let trial = LicenseGrant::new("TRIAL-0000-0000-01", "t@trial.local", ProductType::trial(14))
            .expires_in_days(14);
        let id = store.create_license(&trial).await.unwrap();
        store
            .create_activation(id, "c".repeat(32).as_str(), &serde_json::json!({}))
            .await
            .unwrap();

        let latest = store.get_latest_trial().await.unwrap().unwrap();
        assert!(latest.is_trial());

        assert!(store.delete_license("TRIAL-0000-0000-01").await.unwrap());
        assert!(!store.delete_license("TRIAL-0000-0000-01").await.unwrap());
        assert!(store.active_activations(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_validated_and_activated() {
        let (_db, store) = store().await;
        store
            .create_license(&grant("ENT-AAAA-BBBB-CCCC").with_status(LicenseStatus::Inactive))
            .await
            .unwrap();
        let at = Utc::now();

        assert!(store.mark_activated("ENT-AAAA-BBBB-CCCC", at).await.unwrap());
        assert!(store.mark_validated("ENT-AAAA-BBBB-CCCC", at).await.unwrap());
        assert!(!store.mark_validated("ENT-NOPE-NOPE-NOPE", at).await.unwrap());

        let license = store.get_license_by_key("ENT-AAAA-BBBB-CCCC").await.unwrap().unwrap();
        assert_eq!(license.status, LicenseStatus::Active);
        assert!(license.activated_at.is_some());
        let validated = license.last_validated_at.unwrap();
        assert!((validated - at).num_milliseconds().abs() < 1);
    }
}
