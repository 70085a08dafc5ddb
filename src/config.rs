//! Environment-backed runtime configuration.

use std::{env, error::Error, fmt, time::Duration};

use crate::domain::ChannelId;
use crate::error::LinkError;
use crate::lifecycle::LifecyclePolicy;
use crate::transport::{RetryPolicy, TransportConfig};

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_OPERATOR_ID: &str = "default";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_PAIRING_TIMEOUT_SECS: u64 = 90;
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RECONNECT_BASE_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Runtime configuration for a lifecycle controller and its transport.
///
/// # Example
///
/// ```ignore
/// use walink::config::LinkConfig;
///
/// let config = LinkConfig::default()
///     .with_base_url("https://wa.example.com")
///     .with_operator_id("op-42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Messaging backend base URL, without trailing slash.
    pub base_url: String,
    /// Operator whose push feed is subscribed.
    pub operator_id: String,
    /// Channels to register at startup.
    pub channels: Vec<ChannelId>,
    /// Status polling period while the push channel is down.
    pub poll_interval: Duration,
    /// Lifetime of a pairing payload before the attempt is failed.
    pub pairing_timeout: Duration,
    /// Maximum time spent authenticating after a scan.
    pub auth_timeout: Duration,
    /// Upper bound for each backend command.
    pub command_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Consecutive failed poll rounds before channels are marked unreachable.
    pub failure_threshold: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            operator_id: DEFAULT_OPERATOR_ID.to_string(),
            channels: Vec::new(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            pairing_timeout: Duration::from_secs(DEFAULT_PAIRING_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            reconnect_base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = optional_trimmed_env("WALINK_BASE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "WALINK_BASE_URL",
                value: base_url,
                reason: "must be an http(s) URL".to_owned(),
            });
        }

        let operator_id = optional_trimmed_env("WALINK_OPERATOR_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_OPERATOR_ID.to_string());

        let channels = optional_trimmed_env("WALINK_CHANNELS", &mut lookup)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(ChannelId::from)
                    .collect()
            })
            .unwrap_or_default();

        let poll_interval_ms =
            parse_u64_with_default("WALINK_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS, &mut lookup)?;
        let pairing_timeout_secs = parse_u64_with_default(
            "WALINK_PAIRING_TIMEOUT_SECS",
            DEFAULT_PAIRING_TIMEOUT_SECS,
            &mut lookup,
        )?;
        let auth_timeout_secs =
            parse_u64_with_default("WALINK_AUTH_TIMEOUT_SECS", DEFAULT_AUTH_TIMEOUT_SECS, &mut lookup)?;
        let command_timeout_secs = parse_u64_with_default(
            "WALINK_COMMAND_TIMEOUT_SECS",
            DEFAULT_COMMAND_TIMEOUT_SECS,
            &mut lookup,
        )?;
        let reconnect_base_ms =
            parse_u64_with_default("WALINK_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS, &mut lookup)?;
        let reconnect_max_ms =
            parse_u64_with_default("WALINK_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS, &mut lookup)?;
        let failure_threshold = parse_optional_u32("WALINK_FAILURE_THRESHOLD", &mut lookup)?
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        for (key, value) in [
            ("WALINK_POLL_INTERVAL_MS", poll_interval_ms),
            ("WALINK_PAIRING_TIMEOUT_SECS", pairing_timeout_secs),
            ("WALINK_AUTH_TIMEOUT_SECS", auth_timeout_secs),
            ("WALINK_COMMAND_TIMEOUT_SECS", command_timeout_secs),
            ("WALINK_FAILURE_THRESHOLD", u64::from(failure_threshold)),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }
        if reconnect_max_ms < reconnect_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "WALINK_RECONNECT_MAX_MS",
                value: reconnect_max_ms.to_string(),
                reason: format!("must not be below WALINK_RECONNECT_BASE_MS ({reconnect_base_ms})"),
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            operator_id,
            channels,
            poll_interval: Duration::from_millis(poll_interval_ms),
            pairing_timeout: Duration::from_secs(pairing_timeout_secs),
            auth_timeout: Duration::from_secs(auth_timeout_secs),
            command_timeout: Duration::from_secs(command_timeout_secs),
            reconnect_base: Duration::from_millis(reconnect_base_ms),
            reconnect_max: Duration::from_millis(reconnect_max_ms),
            failure_threshold,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_operator_id(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = operator_id.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.channels.push(channel.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the push reconnection backoff range.
    pub fn with_reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Timer and timeout settings for the lifecycle controller.
    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            pairing_timeout: self.pairing_timeout,
            auth_timeout: self.auth_timeout,
            command_timeout: self.command_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reconnect_base.as_millis() as u64,
            self.reconnect_max.as_millis() as u64,
        )
    }

    /// Settings for the transport adapter of this operator.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            operator_id: self.operator_id.clone(),
            poll_interval: self.poll_interval,
            retry: self.retry_policy(),
            failure_threshold: self.failure_threshold,
            request_timeout: self.command_timeout,
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for LinkError {
    fn from(err: ConfigError) -> Self {
        LinkError::Config(err.to_string())
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(parse_optional_u64(key, lookup)?.unwrap_or(default))
}
