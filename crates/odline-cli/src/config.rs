//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use odline_core::{ConfigError, ConnectionConfig, ExtractConfig, PlanLimits, RetryConfig};

/// Global configuration for odline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub extract: ExtractConfig,
    pub retry: RetryConfig,
    pub planner: PlanLimits,
    pub output: OutputConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub default: usize,
    pub max: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            default: cpus.min(8),
            max: 16,
        }
    }
}

impl WorkersConfig {
    /// Requested worker count, or the default, capped at `max`
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default).clamp(1, self.max.max(1))
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./odline.toml (current directory)
    /// 2. ~/.config/odline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("odline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "odline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Everything a service call needs: connection, extract and retry sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        odline_core::config::validate(&self.connection, &self.extract, &self.retry)
    }

    /// Connection and retry only; enough for a connection check.
    pub fn validate_connection(&self) -> Result<(), ConfigError> {
        let mut failures = Vec::new();
        self.connection.validate(&mut failures);
        self.retry.validate(&mut failures);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odline_core::{AssertionMode, AuthType};

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.dir, PathBuf::from("./data"));
        assert!(config.workers.default >= 1);
        assert_eq!(config.planner, PlanLimits::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.connection.auth_type, AuthType::Basic);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[connection]
base_url = "https://api.example.com/odata/v2"
auth_type = "oAuth2"
token_url = "https://api.example.com/oauth/token"
client_id = "client-1"
company_id = "ACME"
assertion_mode = "enterToken"
assertion_token = "PHNhbWw+"

[extract]
entity = "User"
filter = "status eq 't'"
split_count = 4

[retry]
initial_delay_secs = 1
max_delay_secs = 30

[planner]
max_split_count = 20

[output]
dir = "/tmp/odata"

[workers]
default = 4
max = 8
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.auth_type, AuthType::OAuth2);
        assert_eq!(config.connection.assertion_mode, AssertionMode::Enter);
        assert_eq!(config.extract.entity, "User");
        assert_eq!(config.extract.split_count, 4);
        assert_eq!(config.retry.initial_delay_secs, 1);
        assert_eq!(config.retry.multiplier, 2);
        assert_eq!(config.planner.max_split_count, 20);
        assert_eq!(config.planner.default_batch_size, 2500);
        assert_eq!(config.output.dir, PathBuf::from("/tmp/odata"));
        assert_eq!(config.workers.default, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_reports_every_section() {
        let toml = r#"
[connection]
base_url = "not a url"

[retry]
multiplier = 1
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.has_field("connection.base_url"));
        assert!(err.has_field("connection.username"));
        assert!(err.has_field("extract.entity"));
        assert!(err.has_field("retry.multiplier"));

        let err = config.validate_connection().unwrap_err();
        assert!(!err.has_field("extract.entity"));
    }

    #[test]
    fn worker_resolution() {
        let workers = WorkersConfig { default: 4, max: 8 };
        assert_eq!(workers.resolve(None), 4);
        assert_eq!(workers.resolve(Some(32)), 8);
        assert_eq!(workers.resolve(Some(0)), 1);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odline.toml");
        std::fs::write(&path, "[extract]\nentity = \"PerPerson\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.extract.entity, "PerPerson");
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
