use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::alerts::{AlertType, DedupFailurePolicy};

/// Result type alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub events: EventConfig,
    pub alerts: AlertConfig,
    pub ml: MlConfig,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            database: "procurement_lighthouse".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.database
            ),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct EventConfig {
    pub channels: ChannelNames,
    pub reconnect_delay_secs: u64,
    pub max_retries: u32,
    pub poll_timeout_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channels: ChannelNames::default(),
            reconnect_delay_secs: 5,
            max_retries: 3,
            poll_timeout_ms: 1000,
        }
    }
}

impl EventConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Notification channel name per event kind
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ChannelNames {
    pub inventory_changed: String,
    pub order_status_changed: String,
    pub alert_generated: String,
    pub forecast_updated: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            inventory_changed: "inventory-changed".to_string(),
            order_status_changed: "order-status-changed".to_string(),
            alert_generated: "alert-generated".to_string(),
            forecast_updated: "forecast-updated".to_string(),
        }
    }
}

impl ChannelNames {
    pub fn all(&self) -> [&str; 4] {
        [
            &self.inventory_changed,
            &self.order_status_changed,
            &self.alert_generated,
            &self.forecast_updated,
        ]
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Per-type overrides of the dedup window, in minutes
    pub dedup_windows: HashMap<AlertType, u32>,
    /// Resolved alerts older than this are purged by the maintenance pass
    pub retention_days: u32,
    pub cleanup_interval_hours: u32,
    /// Default horizon of the explicit `cleanup` command
    pub cleanup_days: u32,
    pub maintenance_interval_secs: u64,
    /// Run maintenance every N processed events as well; 0 disables
    pub maintenance_every_events: u64,
    pub dedup_failure: DedupFailurePolicy,
    pub dashboard_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_windows: HashMap::new(),
            retention_days: 7,
            cleanup_interval_hours: 24,
            cleanup_days: 30,
            maintenance_interval_secs: 300,
            maintenance_every_events: 100,
            dedup_failure: DedupFailurePolicy::default(),
            dashboard_limit: 20,
        }
    }
}

impl AlertConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct MlConfig {
    /// Base URL of the prediction service. Unset means predictions are
    /// always unavailable.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Minimum absolute stock change that triggers predictions
    pub change_threshold: i64,
    pub horizon_days: u32,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
            change_threshold: 10,
            horizon_days: 7,
        }
    }
}

impl MlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn channel_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,62}$").expect("valid regex"))
}

impl Config {
    /// Loads the configuration: file (if any), then `.env`, then the process
    /// environment on top.
    pub fn load(path: Option<&str>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => read_config_file(path)?,
            None => Config::default(),
        };

        if dotenv::dotenv().is_ok() {
            debug!("loaded .env file");
        }

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        trace!("effective config: {config:?}");
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = lookup("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = parse_env(&lookup, "DB_PORT")? {
            self.database.port = port;
        }
        if let Some(name) = lookup("DB_NAME") {
            self.database.database = name;
        }
        if let Some(user) = lookup("DB_USER") {
            self.database.username = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(delay) = parse_env(&lookup, "LIGHTHOUSE_RECONNECT_DELAY")? {
            self.events.reconnect_delay_secs = delay;
        }
        if let Some(retries) = parse_env(&lookup, "LIGHTHOUSE_MAX_RETRIES")? {
            self.events.max_retries = retries;
        }
        if let Some(days) = parse_env(&lookup, "LIGHTHOUSE_RETENTION_DAYS")? {
            self.alerts.retention_days = days;
        }
        if let Some(secs) = parse_env(&lookup, "LIGHTHOUSE_MAINTENANCE_INTERVAL")? {
            self.alerts.maintenance_interval_secs = secs;
        }
        if let Some(url) = lookup("ML_SERVICE_URL") {
            self.ml.base_url = Some(url).filter(|url| !url.is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let channels = self.events.channels.all();
        for name in channels {
            if !channel_name_pattern().is_match(name) {
                return Err(ConfigError::Invalid(format!(
                    "channel name {name:?} is not a valid identifier"
                )));
            }
        }
        for (i, name) in channels.iter().enumerate() {
            if channels[..i].contains(name) {
                return Err(ConfigError::Invalid(format!(
                    "channel {name:?} is configured for more than one event kind"
                )));
            }
        }
        if self.events.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "events.poll_timeout_ms must be positive".to_string(),
            ));
        }
        if self.alerts.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "alerts.maintenance_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Dedup window per alert type, defaults overlaid with configured overrides
    pub fn dedup_windows(&self) -> crate::alerts::DedupWindows {
        crate::alerts::DedupWindows::with_overrides(&self.alerts.dedup_windows)
    }
}

fn parse_env<F, T>(lookup: &F, key: &'static str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&file_content)
        .map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
        .inspect(|config| trace!("loaded config: {config:?}"))
}
