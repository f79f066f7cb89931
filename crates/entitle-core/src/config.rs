//! Licensing configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the licensing subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicensingConfig {
    /// SQLite connection URL for the local license cache.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Remote authority settings.
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Days of offline use tolerated after expiry.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
    /// Remaining days at which a valid license is flagged as expiring.
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,
    /// Shortest accepted license key.
    #[serde(default = "default_min_key_length")]
    pub min_key_length: usize,
    /// Key prefixes rejected before any lookup (case-insensitive).
    #[serde(default = "default_blocked_prefixes")]
    pub blocked_prefixes: Vec<String>,
}

fn default_database_url() -> String {
    "sqlite://entitle.db".to_string()
}

fn default_grace_period_days() -> i64 {
    7
}

fn default_expiry_warning_days() -> i64 {
    30
}

fn default_min_key_length() -> usize {
    10
}

fn default_blocked_prefixes() -> Vec<String> {
    ["invalid", "test", "fake", "demo", "INVALID-"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            cloud: CloudConfig::default(),
            grace_period_days: default_grace_period_days(),
            expiry_warning_days: default_expiry_warning_days(),
            min_key_length: default_min_key_length(),
            blocked_prefixes: default_blocked_prefixes(),
        }
    }
}

impl LicensingConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `ENTITLE_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `ENTITLE_*` overrides from an arbitrary lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ENTITLE_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(url) = lookup("ENTITLE_API_URL") {
            self.cloud.api_url = url;
        }
        if let Some(token) = lookup("ENTITLE_API_TOKEN") {
            self.cloud.api_token = Some(token);
        }
        if let Some(days) = lookup("ENTITLE_GRACE_PERIOD_DAYS") {
            self.grace_period_days = parse_number("ENTITLE_GRACE_PERIOD_DAYS", &days)?;
        }
        if let Some(days) = lookup("ENTITLE_EXPIRY_WARNING_DAYS") {
            self.expiry_warning_days = parse_number("ENTITLE_EXPIRY_WARNING_DAYS", &days)?;
        }
        Ok(self)
    }

    /// Set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Set the remote authority base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.cloud.api_url = url.into();
        self
    }

    pub fn with_cloud(mut self, cloud: CloudConfig) -> Self {
        self.cloud = cloud;
        self
    }

    /// Set the grace period.
    pub fn with_grace_period_days(mut self, days: i64) -> Self {
        self.grace_period_days = days;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database_url.starts_with("sqlite:") {
            return Err(Error::Config(format!(
                "database_url must be a sqlite URL: {}",
                self.database_url
            )));
        }
        if self.grace_period_days < 0 || self.expiry_warning_days < 0 {
            return Err(Error::Config("day counts must not be negative".to_string()));
        }
        if self.min_key_length == 0 {
            return Err(Error::Config("min_key_length must be positive".to_string()));
        }
        self.cloud.validate()
    }
}

fn parse_number(name: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be an integer, got {value:?}")))
}

/// Remote authority client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the license API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Connectivity probe URL; `<api_url>/health` when unset.
    #[serde(default)]
    pub probe_url: Option<String>,
    /// Bearer token sent with every call.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries after the first attempt, on timeouts and connection errors only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear back-off step between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_api_url() -> String {
    "https://license.entitle.app/api/v1".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    8_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            probe_url: None,
            api_token: None,
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl CloudConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeouts(mut self, probe: Duration, request: Duration) -> Self {
        self.probe_timeout_ms = probe.as_millis() as u64;
        self.request_timeout_ms = request.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn probe_endpoint(&self) -> String {
        self.probe_url
            .clone()
            .unwrap_or_else(|| format!("{}/health", self.api_url.trim_end_matches('/')))
    }

    pub fn validate(&self) -> Result<()> {
        for raw in std::iter::once(&self.api_url).chain(self.probe_url.as_ref()) {
            let parsed = url::Url::parse(raw)
                .map_err(|e| Error::Config(format!("invalid URL {raw:?}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!("unsupported URL scheme: {raw}")));
            }
        }
        if self.max_retries > 2 {
            return Err(Error::Config(
                "max_retries is capped at 2 so a dead server fails fast".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LicensingConfig::default();
        assert_eq!(config.grace_period_days, 7);
        assert_eq!(config.expiry_warning_days, 30);
        assert_eq!(config.min_key_length, 10);
        assert_eq!(config.cloud.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.cloud.max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grace_period_days: 14\ncloud:\n  api_url: http://localhost:9000").unwrap();

        let config = LicensingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.grace_period_days, 14);
        assert_eq!(config.cloud.api_url, "http://localhost:9000");
        assert_eq!(config.cloud.request_timeout_ms, 8_000);
        assert_eq!(config.blocked_prefixes.len(), 5);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ENTITLE_API_URL", "http://127.0.0.1:8080"),
            ("ENTITLE_GRACE_PERIOD_DAYS", "3"),
        ]
        .into_iter()
        .collect();

        let config = LicensingConfig::default()
            .with_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.cloud.api_url, "http://127.0.0.1:8080");
        assert_eq!(config.grace_period_days, 3);
        assert_eq!(config.cloud.probe_endpoint(), "http://127.0.0.1:8080/health");
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let err = LicensingConfig::default()
            .with_overrides(|name| (name == "ENTITLE_GRACE_PERIOD_DAYS").then(|| "seven".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let config = LicensingConfig::default().with_api_url("ftp://example.com");
        assert!(config.validate().is_err());
        let config = LicensingConfig::default().with_database_url("postgres://db");
        assert!(config.validate().is_err());
    }
}
