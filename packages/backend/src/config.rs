//! Backend connection configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `SAFEWALK_BACKEND_URL` | `base_url` |
//! | `SAFEWALK_API_KEY` | `api_key` |
//! | `SAFEWALK_ACCESS_TOKEN` | `access_token` |
//! | `SAFEWALK_USER_ID` | `user_id` |
//! | `SAFEWALK_ROUTING_URL` | `routing_url` |

use std::path::Path;
use std::time::Duration;

use safewalk_report_models::DEFAULT_SNAPSHOT_LIMIT;
use serde::Deserialize;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for [`BackendConfig`].
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required setting is missing or malformed.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Connection settings for the hosted backend and routing service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Project URL of the hosted backend (e.g. `"https://xyz.example.co"`).
    #[serde(default)]
    pub base_url: String,
    /// Public API key sent with every request.
    #[serde(default)]
    pub api_key: String,
    /// Session token of the signed-in user; falls back to `api_key`.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Voting identity of the signed-in user. Voting is disabled without it.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Endpoint of the safer-route service.
    #[serde(default)]
    pub routing_url: Option<String>,
    /// Number of reports requested by a snapshot fetch.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: u32,
    /// Seconds between change-feed polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_snapshot_limit() -> u32 {
    DEFAULT_SNAPSHOT_LIMIT
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            user_id: None,
            routing_url: None,
            snapshot_limit: default_snapshot_limit(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Parses a TOML document. Does not apply environment overrides or
    /// validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the document is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads the TOML file at `path`, applies environment overrides, and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// merged settings are incomplete.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        log::debug!("Loaded backend config from {}", path.display());
        Ok(config)
    }

    /// Builds the configuration from environment variables alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the URL or API key is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields with values returned by `lookup` for the
    /// `SAFEWALK_*` keys. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SAFEWALK_BACKEND_URL") {
            self.base_url = v;
        }
        if let Some(v) = get("SAFEWALK_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = get("SAFEWALK_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = get("SAFEWALK_USER_ID") {
            self.user_id = Some(v);
        }
        if let Some(v) = get("SAFEWALK_ROUTING_URL") {
            self.routing_url = Some(v);
        }
    }

    /// Checks that the settings needed to reach the backend are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "base_url is not set (SAFEWALK_BACKEND_URL)".to_string(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                message: format!("base_url must be an http(s) URL, got {}", self.base_url),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "api_key is not set (SAFEWALK_API_KEY)".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "poll_interval_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL of the REST interface (`{base_url}/rest/v1`).
    #[must_use]
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.base_url.trim_end_matches('/'))
    }

    /// Bearer token to send: the session token if present, else the API key.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    /// Interval between change-feed polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
