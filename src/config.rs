use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::export::ExportFormat;

pub const CONFIG_FILE: &str = ".pr-export.toml";
const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration loaded from .pr-export.toml.
/// All fields are optional; the tool works with zero config as long as
/// GITHUB_TOKEN is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub bots: BotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. GITHUB_TOKEN env var overrides it when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// REST API base, e.g. https://ghe.example.com/api/v3 for Enterprise
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cache.db
    #[serde(default = "default_cache_location")]
    pub location: PathBuf,

    /// Sync metadata older than this is reported as stale
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: default_cache_location(),
            max_age_days: default_max_age_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub default_format: ExportFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Page size used when listing pull requests
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Login substrings seeded into the cache's bot pattern table
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_cache_location() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| {
        warn!("could not determine home directory, caching under the current directory");
        PathBuf::from(".")
    });
    home.join(".pr-export")
}

fn default_max_age_days() -> u32 {
    90
}

fn default_batch_size() -> u32 {
    100
}

impl Config {
    /// Load configuration from .pr-export.toml in the current directory.
    /// Returns default config if the file doesn't exist. GITHUB_TOKEN from
    /// the environment overrides any token in the file.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                config.github.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Load from a specific path without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn cache_db(&self) -> PathBuf {
        self.cache.location.join("cache.db")
    }

    /// Whether a sync performed at `last_sync` is older than `max_age_days`.
    pub fn is_cache_stale(&self, last_sync: chrono::DateTime<chrono::Utc>) -> bool {
        let max_age = chrono::Duration::days(i64::from(self.cache.max_age_days));
        chrono::Utc::now() - last_sync > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.fetch.batch_size, 100);
        assert_eq!(config.cache.max_age_days, 90);
        assert_eq!(config.export.default_format, ExportFormat::Jsonl);
        assert!(config.bots.extra_patterns.is_empty());
        assert!(config.cache_db().ends_with(".pr-export/cache.db"));
    }

    #[test]
    fn test_default_cache_location_is_under_home() {
        let location = default_cache_location();
        assert!(location.ends_with(".pr-export"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(location, home.join(".pr-export"));
        }
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[github]
api_url = "https://ghe.example.com/api/v3"

[export]
default_format = "csv"

[fetch]
batch_size = 50

[bots]
extra_patterns = ["mergify"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.github.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(config.export.default_format, ExportFormat::Csv);
        assert_eq!(config.fetch.batch_size, 50);
        assert_eq!(config.bots.extra_patterns, vec!["mergify"]);
        assert_eq!(config.cache.max_age_days, 90);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.fetch.batch_size = 25;
        config.cache.location = dir.path().join("cache");
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.fetch.batch_size, 25);
        assert_eq!(loaded.cache.location, dir.path().join("cache"));
    }

    #[test]
    fn test_empty_token_is_treated_as_missing() {
        let mut config = Config::default();
        config.github.token = Some(String::new());
        assert!(config.github_token().is_none());
        config.github.token = Some("ghp_abc".to_string());
        assert_eq!(config.github_token(), Some("ghp_abc"));
    }

    #[test]
    fn test_cache_staleness() {
        let config = Config::default();
        assert!(!config.is_cache_stale(chrono::Utc::now()));
        assert!(config.is_cache_stale(chrono::Utc::now() - chrono::Duration::days(91)));
    }
}
