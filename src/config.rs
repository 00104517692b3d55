//! Runtime configuration
//!
//! Loaded once at startup from an optional file (TOML, JSON or YAML, by
//! extension) overlaid with `MAILBOUNCE_*` environment variables, then
//! passed explicitly to the components that need it.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::feed::DEFAULT_PAGE_SIZE;
use crate::mail::DEFAULT_SENDMAIL;
use crate::utils::local_hostname;

/// Prefix of the environment variables read by `BouncerConfig::load`
pub const ENV_PREFIX: &str = "MAILBOUNCE";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BouncerConfig {
    /// Directory holding the `events` and `bounced` stores
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Sending domain whose events are fetched
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Seconds between polls in monitor mode
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Events per listed page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Log bounces instead of sending them
    #[serde(default)]
    pub dry_run: bool,

    /// Store events without sending bounces
    #[serde(default)]
    pub no_bounce: bool,

    /// Path to the sendmail binary
    #[serde(default = "default_sendmail_path")]
    pub sendmail_path: PathBuf,

    /// Seconds to wait for sendmail before killing it
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Host named in `Reporting-MTA` and the daemon address; the local host
    /// name when unset
    #[serde(default)]
    pub reporting_host: Option<String>,

    /// Failed monitor ticks in a row before giving up; 0 never gives up
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log destination: `stderr`, `stdout` (or `-`), or a file path
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// JSON-lines file the event feed reads from
    #[serde(default)]
    pub feed_path: Option<PathBuf>,
}

fn default_data_root() -> PathBuf {
    let cache = env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")));

    match cache {
        Some(dir) => dir.join("mailbounce"),
        None => PathBuf::from("mailbounce-data"),
    }
}

/// The local host name without its first label
fn default_domain() -> String {
    let host = local_hostname();
    match host.split_once('.') {
        Some((_, domain)) if !domain.is_empty() => domain.to_string(),
        _ => host,
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from(DEFAULT_SENDMAIL)
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "stderr".to_string()
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            domain: default_domain(),
            poll_interval_secs: default_poll_interval_secs(),
            page_size: default_page_size(),
            dry_run: false,
            no_bounce: false,
            sendmail_path: default_sendmail_path(),
            send_timeout_secs: default_send_timeout_secs(),
            reporting_host: None,
            max_consecutive_failures: default_max_consecutive_failures(),
            log_level: default_log_level(),
            log_file: default_log_file(),
            feed_path: None,
        }
    }
}

impl BouncerConfig {
    /// Load configuration from `path` (if given) and the environment
    ///
    /// Environment variables win over the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(Environment::with_prefix(prefix).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Message("page_size must be at least 1".to_string()));
        }
        if self.send_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "send_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.domain.trim().is_empty() {
            return Err(ConfigError::Message("domain must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
