//! Runtime settings: an optional TOML file, then environment overrides.
//!
//! ```toml
//! database_path = "ballotcache.db"
//! site_prefix = "01"
//! search_radius_miles = 25.0
//!
//! [geocoder]
//! api_key = "..."
//! timeout_secs = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distance::MAX_SEARCH_RADIUS_MILES;
use crate::rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ballotcache.toml";

pub const ENV_DB_PATH: &str = "BALLOTCACHE_DB";
pub const ENV_API_KEY: &str = "GOOGLE_MAPS_API_KEY";
pub const ENV_GEOCODER_BASE_URL: &str = "BALLOTCACHE_GEOCODER_BASE_URL";
pub const ENV_SITE_PREFIX: &str = "BALLOTCACHE_SITE_PREFIX";
pub const ENV_SEARCH_RADIUS: &str = "BALLOTCACHE_SEARCH_RADIUS_MILES";
pub const ENV_RETRY_MAX: &str = "BALLOTCACHE_GEOCODER_RETRY_MAX";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Embedded in new permanent ballot ids (`wv{site_prefix}ballot{n}`).
    pub site_prefix: String,
    pub search_radius_miles: f64,
    pub geocoder: GeocoderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderSettings {
    pub api_key: Option<String>,
    /// Overrides the provider endpoint; used for staging and tests.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_requests: u64,
    pub window_ms: u64,
    pub cache_ttl_secs: u64,
    /// Retries of the keyed request on transient failures, before the keyless fallback.
    pub retry_max: usize,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("ballotcache.db"),
            site_prefix: "00".to_string(),
            search_radius_miles: MAX_SEARCH_RADIUS_MILES,
            geocoder: GeocoderSettings::default(),
        }
    }
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout_secs: geocoder_api::DEFAULT_TIMEOUT.as_secs(),
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW.as_millis() as u64,
            cache_ttl_secs: 3600,
            retry_max: 1,
            retry_base_ms: 250,
            retry_max_ms: 2000,
        }
    }
}

impl GeocoderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Reads `path` (or [`DEFAULT_CONFIG_FILE`] if present), applies
    /// environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => Self::read_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::read_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Applies overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(db) = get(ENV_DB_PATH) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.geocoder.api_key = Some(key);
        }
        if let Some(url) = get(ENV_GEOCODER_BASE_URL) {
            self.geocoder.base_url = Some(url);
        }
        if let Some(prefix) = get(ENV_SITE_PREFIX) {
            self.site_prefix = prefix;
        }
        if let Some(radius) = get(ENV_SEARCH_RADIUS) {
            self.search_radius_miles = radius.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a number, got '{}'", ENV_SEARCH_RADIUS, radius))
            })?;
        }
        if let Some(retries) = get(ENV_RETRY_MAX) {
            self.geocoder.retry_max = retries.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be an integer, got '{}'", ENV_RETRY_MAX, retries))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.search_radius_miles > 0.0 && self.search_radius_miles <= 500.0) {
            return Err(ConfigError::Invalid(format!(
                "search_radius_miles must be in (0, 500], got {}",
                self.search_radius_miles
            )));
        }
        if self.geocoder.timeout_secs == 0 {
            return Err(ConfigError::Invalid("geocoder.timeout_secs must be > 0".to_string()));
        }
        if self.geocoder.window_ms == 0 {
            return Err(ConfigError::Invalid("geocoder.window_ms must be > 0".to_string()));
        }
        if self.site_prefix.trim().is_empty()
            || !self.site_prefix.trim().chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::Invalid(format!(
                "site_prefix must be alphanumeric, got '{}'",
                self.site_prefix
            )));
        }
        Ok(())
    }
}
