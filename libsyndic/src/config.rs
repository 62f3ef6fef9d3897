//! Configuration management for Syndic

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::retry::{DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MIN_BACKOFF_SECS};
use crate::scheduler::DEFAULT_IN_FLIGHT_GRACE_SECS;
use crate::tokens::DEFAULT_REFRESH_MARGIN_SECS;
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Per-platform API settings, keyed by platform name
    #[serde(default)]
    pub platforms: HashMap<String, PlatformApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between due-row sweeps in the daemon
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// How long an in-flight attempt may sit before recovery reclaims it
    #[serde(default = "default_grace")]
    pub in_flight_grace_secs: i64,
    #[serde(default = "default_min_backoff")]
    pub min_backoff_secs: i64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: i64,
    /// Tokens expiring within this margin are refreshed before use
    #[serde(default = "default_refresh_margin")]
    pub token_refresh_margin_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformApiConfig {
    #[serde(default)]
    pub enabled: bool,
    pub api_base: String,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// LinkedIn only: the organization URN posts are authored as
    pub author_urn: Option<String>,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_grace() -> i64 {
    DEFAULT_IN_FLIGHT_GRACE_SECS
}

fn default_min_backoff() -> i64 {
    DEFAULT_MIN_BACKOFF_SECS
}

fn default_max_backoff() -> i64 {
    DEFAULT_MAX_BACKOFF_SECS
}

fn default_refresh_margin() -> i64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            in_flight_grace_secs: default_grace(),
            min_backoff_secs: default_min_backoff(),
            max_backoff_secs: default_max_backoff(),
            token_refresh_margin_secs: default_refresh_margin(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to the
    /// built-in defaults when no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default_config()
        };
        if let Ok(path) = std::env::var("SYNDIC_DB_PATH") {
            config.database.path = path;
        }
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndic/syndic.db".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            platforms: HashMap::new(),
        }
    }

    /// Enabled platform sections with their parsed platform, skipping
    /// unknown names.
    pub fn enabled_platforms(&self) -> Vec<(Platform, &PlatformApiConfig)> {
        self.platforms
            .iter()
            .filter(|(_, api)| api.enabled)
            .filter_map(|(name, api)| Platform::parse(name).map(|p| (p, api)))
            .collect()
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDIC_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndic").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default_config();
        assert!(config.database.path.ends_with("syndic.db"));
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.scheduler.in_flight_grace_secs, 300);
        assert!(config.platforms.is_empty());
    }

    #[test]
    fn parses_a_full_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[database]
path = "/tmp/syndic-test.db"

[scheduler]
sweep_interval_secs = 15
min_backoff_secs = 10

[platforms.meta]
enabled = true
api_base = "https://graph.facebook.com/v19.0"
token_url = "https://graph.facebook.com/oauth/access_token"
client_id = "cid"
client_secret = "secret"

[platforms.x]
enabled = false
api_base = "https://api.twitter.com"
"#
        )
        .unwrap();

        let config = Config::load_from_path(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.database.path, "/tmp/syndic-test.db");
        assert_eq!(config.scheduler.sweep_interval_secs, 15);
        assert_eq!(config.scheduler.min_backoff_secs, 10);
        // Unset scheduler fields fall back to defaults.
        assert_eq!(config.scheduler.max_backoff_secs, 3600);

        let enabled = config.enabled_platforms();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, Platform::Meta);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is not toml [[").unwrap();
        assert!(Config::load_from_path(&file.path().to_path_buf()).is_err());
    }

    #[test]
    #[serial]
    fn env_var_overrides_config_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[database]\npath = \"/tmp/from-env.db\"\n").unwrap();
        std::env::set_var("SYNDIC_CONFIG", file.path());

        let resolved = resolve_config_path().unwrap();
        assert_eq!(resolved, file.path());

        let config = Config::load().unwrap();
        assert_eq!(config.database.path, "/tmp/from-env.db");
        std::env::remove_var("SYNDIC_CONFIG");
    }

    #[test]
    #[serial]
    fn db_path_env_var_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[database]\npath = \"/tmp/from-file.db\"\n").unwrap();
        std::env::set_var("SYNDIC_CONFIG", file.path());
        std::env::set_var("SYNDIC_DB_PATH", "/tmp/override.db");

        let config = Config::load().unwrap();
        assert_eq!(config.database.path, "/tmp/override.db");

        std::env::remove_var("SYNDIC_CONFIG");
        std::env::remove_var("SYNDIC_DB_PATH");
    }
}
