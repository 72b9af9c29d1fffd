//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fl_core::{LoadingConfig, UserId};
use fl_sync::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Owner of every event recorded on this device.
    pub user_id: String,

    /// Base URL of the backend, e.g. `https://fleet.example.com`.
    pub api_url: Option<String>,

    /// Bearer token for the backend.
    pub api_token: Option<String>,

    /// Expected net work per worked day, used for overtime.
    pub expected_daily_hours: f64,

    pub loading: LoadingConfig,

    pub sync: SyncSettings,
}

/// Upload retry settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: u64::try_from(policy.base_delay.as_millis()).unwrap_or(500),
        }
    }
}

impl From<SyncSettings> for RetryPolicy {
    fn from(settings: SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: std::time::Duration::from_millis(settings.base_delay_ms),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("user_id", &self.user_id)
            .field("api_url", &self.api_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("expected_daily_hours", &self.expected_daily_hours)
            .field("loading", &self.loading)
            .field("sync", &self.sync)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("fleetlog.db"),
            user_id: "driver".to_string(),
            api_url: None,
            api_token: None,
            expected_daily_hours: 8.0,
            loading: LoadingConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources override earlier ones: defaults, the user config file,
    /// `config_path`, then `FL_*` environment variables. Nested keys use a
    /// double underscore, e.g. `FL_LOADING__THRESHOLD_KMH`.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (FL_*)
        figment = figment.merge(Env::prefixed("FL_").split("__"));

        figment.extract()
    }

    /// The configured user as a validated id.
    pub fn user_id(&self) -> anyhow::Result<UserId> {
        UserId::new(self.user_id.clone()).context("user_id must be set in the configuration")
    }

    /// Expected daily work in milliseconds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn expected_daily_ms(&self) -> i64 {
        (self.expected_daily_hours.max(0.0) * 3_600_000.0).round() as i64
    }

    /// Backend URL and token, when both are configured.
    pub fn backend(&self) -> Option<(&str, &str)> {
        Some((self.api_url.as_deref()?, self.api_token.as_deref()?))
    }
}

/// Returns the platform-specific config directory for fleetlog.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fleetlog"))
}

/// Returns the platform-specific data directory for fleetlog.
///
/// On Linux: `~/.local/share/fleetlog`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("fleetlog"))
}
