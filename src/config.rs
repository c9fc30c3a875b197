use crate::error::{VcsError, VcsResult};
use crate::model::version::ChangeType;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub versioning: VersioningConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database directory, required for the rocksdb backend.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub default_branch: String,
    pub default_author: String,
    /// Timeline length when the caller does not pass a limit.
    pub history_limit: usize,
    /// Minimum change ratio for `auto_version` when none is supplied.
    pub auto_version_threshold: f64,
    /// Cap on unified diff lines kept per field.
    pub max_diff_lines: usize,
    /// Extra attempts after a duplicate-version race.
    pub save_retries: usize,
    /// Field name -> severity, layered on top of the built-in table.
    pub severity_overrides: HashMap<String, ChangeType>,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            default_author: "system".to_string(),
            history_limit: 50,
            auto_version_threshold: 0.05,
            max_diff_lines: 50,
            save_retries: 3,
            severity_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> VcsResult<AppConfig> {
    let mut builder = Config::builder().add_source(File::with_name("listing-vcs").required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("LISTING_VCS")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|err| VcsError::ConfigError(err.to_string()))?;

    let parsed: AppConfig = config
        .try_deserialize()
        .map_err(|err| VcsError::ConfigError(err.to_string()))?;

    parsed.validate()?;
    Ok(parsed)
}

impl AppConfig {
    pub fn validate(&self) -> VcsResult<()> {
        let versioning = &self.versioning;

        if !(0.0..=1.0).contains(&versioning.auto_version_threshold) {
            return Err(VcsError::ConfigError(format!(
                "versioning.auto_version_threshold must be within [0, 1], got {}",
                versioning.auto_version_threshold
            )));
        }

        if versioning.default_branch.trim().is_empty() {
            return Err(VcsError::ConfigError(
                "versioning.default_branch must not be empty".to_string(),
            ));
        }

        if let Some((field, _)) = versioning
            .severity_overrides
            .iter()
            .find(|(_, severity)| **severity == ChangeType::Rollback)
        {
            return Err(VcsError::ConfigError(format!(
                "severity override for '{}' must be major, minor or patch",
                field
            )));
        }

        if self.storage.backend == StorageBackend::Rocksdb && self.storage.path.is_none() {
            return Err(VcsError::ConfigError(
                "storage.path is required for the rocksdb backend".to_string(),
            ));
        }

        Ok(())
    }
}
