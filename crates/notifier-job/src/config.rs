//! Layered configuration.
//!
//! Defaults, then `notifier.toml` (or an explicit file), then `NOTIFIER_*`
//! environment variables with `__` separating sections, e.g.
//! `NOTIFIER_DELIVERY__CHAT_ID`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobSettings;

/// Config file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "notifier.toml";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
    #[error("Invalid date override {0:?}, expected MM-DD")]
    Date(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub bridge: BridgeSettings,
    pub records: RecordsConfig,
    pub delivery: DeliveryConfig,
    pub lifecycle: LifecycleConfig,
}

/// Where the authentication session is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session identifier; the stored object is `RemoteAuth-{id}.zip`.
    pub id: String,
    /// Base URL of the storage service.
    pub storage_url: String,
    /// Service key for the storage service.
    pub api_key: String,
    pub bucket: String,
    /// Local mirror of the session archive.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: "whatsapp-bot".to_string(),
            storage_url: String::new(),
            api_key: String::new(),
            bucket: "whatsapp-session".to_string(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// WebSocket URL of the messaging bridge.
    pub url: String,
    /// Browser binary the bridge should launch, as seen from the bridge host.
    pub executable_path: Option<PathBuf>,
    pub args: Vec<String>,
    /// Look `executable_path` up on this host first. Only for a local bridge.
    pub resolve_executable: bool,
    pub request_timeout_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8085".to_string(),
            executable_path: None,
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
            ],
            resolve_executable: false,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// Postgres connection string.
    pub database_url: String,
    pub table: String,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            table: "birthdays".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Destination chat identifier.
    pub chat_id: String,
    /// IANA timezone deciding what "today" is.
    pub timezone: String,
    pub ack_timeout_secs: u64,
    pub send_delay_secs: u64,
    pub send_retries: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chat_id: String::new(),
            timezone: "UTC".to_string(),
            ack_timeout_secs: 20,
            send_delay_secs: 5,
            send_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub drain_delay_secs: u64,
    pub auth_retries: u32,
    pub ready_timeout_secs: u64,
    /// Delete a stored session that no longer authenticates.
    pub discard_stale_session: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_delay_secs: 10,
            auth_retries: 3,
            ready_timeout_secs: 120,
            discard_stale_session: true,
        }
    }
}

impl Config {
    /// Layered sources, lowest precedence first.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("NOTIFIER_").split("__"))
    }

    /// Load and validate.
    ///
    /// # Errors
    /// Returns error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(path))
    }

    /// Extract from `figment` and validate.
    ///
    /// # Errors
    /// Returns error if extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values every command depends on.
    ///
    /// # Errors
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        if self.session.id.trim().is_empty() {
            issues.push("session.id: must not be empty".to_string());
        }
        if self.delivery.chat_id.trim().is_empty() {
            issues.push("delivery.chat_id: must not be empty".to_string());
        }
        if self.delivery.ack_timeout_secs == 0 {
            issues.push("delivery.ack_timeout_secs: must be greater than 0".to_string());
        }
        if self.delivery.timezone.parse::<Tz>().is_err() {
            issues.push(format!(
                "delivery.timezone: unknown timezone {:?}",
                self.delivery.timezone
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    /// Storage URL and key, required unless running dry.
    ///
    /// # Errors
    /// Returns error if either is unset.
    pub fn storage_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let url = non_empty(&self.session.storage_url, "session.storage_url")?;
        let key = non_empty(&self.session.api_key, "session.api_key")?;
        Ok((url, key))
    }

    /// Datastore connection string.
    ///
    /// # Errors
    /// Returns error if unset.
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        non_empty(&self.records.database_url, "records.database_url")
    }

    /// Configured timezone, UTC if it does not parse.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.delivery.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Today's date in the configured timezone.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone()).date_naive()
    }

    #[must_use]
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            chat_id: self.delivery.chat_id.clone(),
            ack_timeout: Duration::from_secs(self.delivery.ack_timeout_secs),
            send_delay: Duration::from_secs(self.delivery.send_delay_secs),
            drain_delay: Duration::from_secs(self.lifecycle.drain_delay_secs),
            auth_retries: self.lifecycle.auth_retries,
            ready_timeout: Duration::from_secs(self.lifecycle.ready_timeout_secs),
            send_retries: self.delivery.send_retries,
            discard_stale_session: self.lifecycle.discard_stale_session,
        }
    }
}

fn non_empty<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(value)
    }
}

/// Date to run for: `today`, or `today`'s year with an `MM-DD` override.
///
/// An override of `02-29` outside a leap year falls back to year 2000, since
/// only month and day are matched.
///
/// # Errors
/// Returns error if the override is not a valid `MM-DD`.
pub fn run_date(today: NaiveDate, date_override: Option<&str>) -> Result<NaiveDate, ConfigError> {
    let Some(raw) = date_override else {
        return Ok(today);
    };
    let invalid = || ConfigError::Date(raw.to_string());

    let (month, day) = raw.trim().split_once('-').ok_or_else(invalid)?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(today.year(), month, day)
        .or_else(|| NaiveDate::from_ymd_opt(2000, month, day))
        .ok_or_else(invalid)
}
