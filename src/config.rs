//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Jitter is clamped into `[0, MAX_JITTER]` so a jittered delay stays positive.
pub const MAX_JITTER: f64 = 0.99;

/// Relay configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Channel that matched messages are forwarded to.
    pub target_channel: String,
    /// Pause between the end of one sweep and the start of the next.
    pub check_interval: Duration,
    /// Upper bound on messages fetched per channel per sweep.
    pub max_messages_per_channel: usize,
    /// Upper bound on channels visited per sweep.
    pub max_channels_per_sweep: usize,
    /// Minimum spacing between consecutive upstream requests.
    pub request_delay: Duration,
    /// Random jitter fraction applied to every delay (0.2 = ±20%).
    pub jitter: f64,
    /// Messages fetched on the first sweep of a channel without markers.
    pub cold_start_lookback: usize,
    /// Pause after a sweep fails outright.
    pub error_pause: Duration,
    /// Pause after each successful forward.
    pub forward_delay: Duration,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Base URL of the upstream API.
    pub api_url: String,
    /// Upstream API token.
    pub api_token: SecretString,
    /// Directory for rolling log files, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_channel: String::new(),
            check_interval: Duration::from_secs(3 * 60),
            max_messages_per_channel: 20,
            max_channels_per_sweep: 20,
            request_delay: Duration::from_secs(1),
            jitter: 0.2,
            cold_start_lookback: 5,
            error_pause: Duration::from_secs(60),
            forward_delay: Duration::from_secs(1),
            db_path: PathBuf::from("./data/channel-relay.db"),
            api_url: "https://api.telegram.org".to_string(),
            api_token: SecretString::from(String::new()),
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Each setting is read from its `RELAY_*` name first, then from the
    /// legacy name used by older deployments.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str, legacy: Option<&str>| -> Option<String> {
            lookup(key)
                .or_else(|| legacy.and_then(&lookup))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let target_channel = get("RELAY_TARGET_CHANNEL", Some("TARGET_CHANNEL_ID"))
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_TARGET_CHANNEL".into()))?;
        let api_token = get("RELAY_API_TOKEN", Some("BOT_TOKEN"))
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_API_TOKEN".into()))?;

        let interval_min: u64 = parse_or(
            get("RELAY_CHECK_INTERVAL_MIN", Some("CHECK_INTERVAL")),
            "RELAY_CHECK_INTERVAL_MIN",
            defaults.check_interval.as_secs() / 60,
        )?;
        if interval_min == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_CHECK_INTERVAL_MIN".into(),
                message: "must be at least 1 minute".into(),
            });
        }

        let max_messages_per_channel: usize = parse_or(
            get("RELAY_MAX_MESSAGES_PER_CHANNEL", Some("MAX_MESSAGES_PER_CHANNEL")),
            "RELAY_MAX_MESSAGES_PER_CHANNEL",
            defaults.max_messages_per_channel,
        )?;
        let max_channels_per_sweep: usize = parse_or(
            get("RELAY_MAX_CHANNELS_PER_SWEEP", Some("MAX_CHANNELS_PER_RUN")),
            "RELAY_MAX_CHANNELS_PER_SWEEP",
            defaults.max_channels_per_sweep,
        )?;
        let request_delay = parse_secs(
            get("RELAY_REQUEST_DELAY_SECS", Some("DELAY_BETWEEN_CHANNELS")),
            "RELAY_REQUEST_DELAY_SECS",
            defaults.request_delay,
        )?;
        let jitter: f64 = parse_or(get("RELAY_JITTER", Some("JITTER")), "RELAY_JITTER", defaults.jitter)?;
        if !jitter.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_JITTER".into(),
                message: format!("{jitter} is not a number"),
            });
        }
        let jitter = jitter.clamp(0.0, MAX_JITTER);
        let cold_start_lookback: usize = parse_or(
            get("RELAY_COLD_START_LOOKBACK", None),
            "RELAY_COLD_START_LOOKBACK",
            defaults.cold_start_lookback,
        )?;
        let error_pause = parse_secs(
            get("RELAY_ERROR_PAUSE_SECS", None),
            "RELAY_ERROR_PAUSE_SECS",
            defaults.error_pause,
        )?;
        let forward_delay = parse_secs(
            get("RELAY_FORWARD_DELAY_SECS", None),
            "RELAY_FORWARD_DELAY_SECS",
            defaults.forward_delay,
        )?;

        if max_messages_per_channel == 0 || max_channels_per_sweep == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_MAX_MESSAGES_PER_CHANNEL / RELAY_MAX_CHANNELS_PER_SWEEP".into(),
                message: "limits must be positive".into(),
            });
        }

        Ok(Self {
            target_channel,
            check_interval: Duration::from_secs(interval_min * 60),
            max_messages_per_channel,
            max_channels_per_sweep,
            request_delay,
            jitter,
            cold_start_lookback,
            error_pause,
            forward_delay,
            db_path: get("RELAY_DB_PATH", None)
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_url: get("RELAY_API_URL", None).unwrap_or(defaults.api_url),
            api_token: SecretString::from(api_token),
            log_dir: get("RELAY_LOG_DIR", None).map(PathBuf::from),
        })
    }

    /// Message limit for one channel fetch.
    ///
    /// Cold channels only look back a few messages so that adding a busy
    /// channel does not flood the target with its backlog.
    pub fn fetch_limit(&self, first_run: bool) -> usize {
        if first_run {
            self.cold_start_lookback.min(self.max_messages_per_channel)
        } else {
            self.max_messages_per_channel.min(20)
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_secs(value: Option<String>, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_or(value, key, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_TARGET_CHANNEL", "-1001234"),
            ("RELAY_API_TOKEN", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.target_channel, "-1001234");
        assert_eq!(config.check_interval, Duration::from_secs(180));
        assert_eq!(config.max_channels_per_sweep, 20);
        assert_eq!(config.cold_start_lookback, 5);
        assert_eq!(config.api_token.expose_secret(), "secret");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_target_is_an_error() {
        let err = RelayConfig::from_lookup(lookup(&[("RELAY_API_TOKEN", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "RELAY_TARGET_CHANNEL"));
    }

    #[test]
    fn legacy_names_are_honoured() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("TARGET_CHANNEL_ID", "-100999"),
            ("BOT_TOKEN", "tok"),
            ("CHECK_INTERVAL", "7"),
            ("MAX_CHANNELS_PER_RUN", "3"),
            ("DELAY_BETWEEN_CHANNELS", "2.5"),
        ]))
        .unwrap();
        assert_eq!(config.target_channel, "-100999");
        assert_eq!(config.check_interval, Duration::from_secs(420));
        assert_eq!(config.max_channels_per_sweep, 3);
        assert_eq!(config.request_delay, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = RelayConfig::from_lookup(lookup(&[
            ("RELAY_TARGET_CHANNEL", "@out"),
            ("RELAY_API_TOKEN", "x"),
            ("RELAY_MAX_MESSAGES_PER_CHANNEL", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RELAY_MAX_MESSAGES_PER_CHANNEL"));
    }

    #[test]
    fn jitter_is_clamped() {
        let with_jitter = |value: &'static str| {
            RelayConfig::from_lookup(lookup(&[
                ("RELAY_TARGET_CHANNEL", "@out"),
                ("RELAY_API_TOKEN", "x"),
                ("RELAY_JITTER", value),
            ]))
        };
        assert_eq!(with_jitter("1.5").unwrap().jitter, MAX_JITTER);
        assert_eq!(with_jitter("-0.3").unwrap().jitter, 0.0);
        assert_eq!(with_jitter("0.4").unwrap().jitter, 0.4);
        assert!(matches!(
            with_jitter("NaN").unwrap_err(),
            ConfigError::InvalidValue { ref key, .. } if key == "RELAY_JITTER"
        ));
    }

    #[test]
    fn fetch_limit_bounds_cold_start() {
        let config = RelayConfig::default();
        assert_eq!(config.fetch_limit(true), 5);
        assert_eq!(config.fetch_limit(false), 20);

        let small = RelayConfig {
            max_messages_per_channel: 3,
            ..RelayConfig::default()
        };
        assert_eq!(small.fetch_limit(true), 3);
        assert_eq!(small.fetch_limit(false), 3);
    }
}
