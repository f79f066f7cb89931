//! CLI configuration management.

use entitle_core::config::LicensingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// SQLite URL; defaults to the platform data directory.
    pub database_url: Option<String>,
    /// License server base URL.
    pub api_url: Option<String>,
    /// Bearer token for the license server.
    pub api_token: Option<String>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn project_dirs() -> Result<directories::ProjectDirs, Box<dyn std::error::Error>> {
        Ok(directories::ProjectDirs::from("app", "entitle", "entitle")
            .ok_or("Could not determine config directory")?)
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(Self::project_dirs()?.config_dir().join("config.yaml"))
    }

    /// License database in the platform data directory.
    pub fn default_database_url() -> Result<String, Box<dyn std::error::Error>> {
        let dir = Self::project_dirs()?.data_dir().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(format!("sqlite://{}", dir.join("entitle.db").display()))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "database_url" => self.database_url = Some(value.to_string()),
            "api_url" => self.api_url = Some(value.to_string()),
            "api_token" => self.api_token = Some(value.to_string()),
            "output_format" => {
                self.output_format = match value {
                    "text" => OutputFormat::Text,
                    "json" => OutputFormat::Json,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }

    /// Layer the licensing configuration: defaults, then `file`, then this
    /// config, then `ENTITLE_*` variables.
    pub fn licensing_config(
        &self,
        file: Option<&Path>,
    ) -> Result<LicensingConfig, Box<dyn std::error::Error>> {
        let mut config = match file {
            Some(path) => LicensingConfig::from_file(path)?,
            None => LicensingConfig::default(),
        };

        match (&self.database_url, file) {
            (Some(url), _) => config = config.with_database_url(url.clone()),
            (None, None) => config = config.with_database_url(Self::default_database_url()?),
            (None, Some(_)) => {}
        }
        if let Some(url) = &self.api_url {
            config = config.with_api_url(url.clone());
        }
        if let Some(token) = &self.api_token {
            config.cloud.api_token = Some(token.clone());
        }

        Ok(config.with_env_overrides()?)
    }
}
