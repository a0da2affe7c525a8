//! Configuration.
//!
//! Values come from the environment (a `.env` file is honored) with
//! defaults for everything except what is inherently per-installation.
//! CLI flags override the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acks::AckConfig;
use crate::error::ConfigError;
use crate::slots::cursor::{DEFAULT_POLL_AHEAD, DEFAULT_SLOT_LIFETIME};

/// Per-channel polling behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Slots generated beyond the cursor head on each pass.
    pub poll_ahead: usize,
    /// How long a skipped slot stays on the frontier.
    #[serde(with = "duration_secs")]
    pub slot_lifetime: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_ahead: DEFAULT_POLL_AHEAD,
            slot_lifetime: DEFAULT_SLOT_LIFETIME,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding accounts.
    pub data_dir: PathBuf,
    /// Directory of the store shared between peers.
    pub store_dir: PathBuf,
    /// Time between polling rounds.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    pub channel: ChannelConfig,
    pub acks: AckConfig,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let data_dir = match optional_env("SLOTMAIL_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let store_dir = optional_env("SLOTMAIL_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("store"));

        let defaults = ChannelConfig::default();
        let channel = ChannelConfig {
            poll_ahead: parse_env("SLOTMAIL_POLL_AHEAD")?.unwrap_or(defaults.poll_ahead),
            slot_lifetime: match parse_env::<u64>("SLOTMAIL_SLOT_LIFETIME_DAYS")? {
                Some(days) => lifetime_from_days(days)?,
                None => defaults.slot_lifetime,
            },
        };

        let ack_defaults = AckConfig::default();
        let acks = AckConfig {
            max_delay_secs: parse_env("SLOTMAIL_ACK_MAX_DELAY_SECS")?
                .unwrap_or(ack_defaults.max_delay_secs),
            max_retries: parse_env("SLOTMAIL_ACK_MAX_RETRIES")?
                .unwrap_or(ack_defaults.max_retries),
            base_delay_ms: parse_env("SLOTMAIL_ACK_BASE_DELAY_MS")?
                .unwrap_or(ack_defaults.base_delay_ms),
            max_backoff_ms: ack_defaults.max_backoff_ms,
        };

        let poll_interval = Duration::from_secs(
            parse_env("SLOTMAIL_POLL_INTERVAL_SECS")?.unwrap_or(300),
        );
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "SLOTMAIL_POLL_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            data_dir,
            store_dir,
            poll_interval,
            channel,
            acks,
        })
    }

    /// Directory of one local account.
    pub fn account_dir(&self, account: &str) -> PathBuf {
        self.data_dir.join("accounts").join(account)
    }
}

/// Default data directory (`~/.slotmail`).
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".slotmail"))
        .ok_or_else(|| ConfigError::NoHomeDir {
            what: "the data directory".to_string(),
        })
}

fn lifetime_from_days(days: u64) -> Result<Duration, ConfigError> {
    days.checked_mul(24 * 60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "SLOTMAIL_SLOT_LIFETIME_DAYS".to_string(),
            message: format!("{days} days is out of range"),
        })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
