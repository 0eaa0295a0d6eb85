use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ASSET: &str = "XAU";
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_PUSH_URL: &str = "ws://127.0.0.1:8001/ws/prices";
pub const DEFAULT_PULL_URL: &str = "http://127.0.0.1:8001/spot";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 7_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_NOTIFICATION_GAP_MS: u64 = 400;
pub const DEFAULT_UPTIME_TICK_MS: u64 = 1_000;
pub const DEFAULT_REFERENCE_REFRESH_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 4_000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_CHANGE_THRESHOLD_PERCENT: f64 = 0.1;
pub const DEFAULT_MIN_PRICE: f64 = 0.0;
pub const DEFAULT_SOUND_ENABLED: bool = false;
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 60_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 300_000;
pub const MIN_NOTIFICATION_GAP_MS: u64 = 100;
pub const MAX_NOTIFICATION_GAP_MS: u64 = 5_000;
pub const MIN_UPTIME_TICK_MS: u64 = 100;
pub const MAX_UPTIME_TICK_MS: u64 = 60_000;
pub const MIN_REFERENCE_REFRESH_MS: u64 = 5_000;
pub const MAX_REFERENCE_REFRESH_MS: u64 = 3_600_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const MIN_HISTORY_CAPACITY: usize = 1;
pub const MAX_HISTORY_CAPACITY: usize = 10_000;

const ENV_PREFIX: &str = "QUOTE_STREAM_";

/// Raw, all-optional settings as they arrive from the environment or a caller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamArgs {
    pub asset: Option<String>,
    pub currency: Option<String>,
    pub push_url: Option<String>,
    pub pull_url: Option<String>,
    pub reference_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub notification_gap_ms: Option<u64>,
    pub uptime_tick_ms: Option<u64>,
    pub reference_refresh_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub history_capacity: Option<usize>,
    pub change_threshold_percent: Option<f64>,
    pub min_price: Option<f64>,
    pub sound_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub asset: String,
    pub currency: String,
    pub push_url: String,
    pub pull_url: String,
    pub reference_url: Option<String>,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub notification_gap: Duration,
    pub uptime_tick: Duration,
    pub reference_refresh: Duration,
    pub request_timeout: Duration,
    pub history_capacity: usize,
    pub change_threshold_percent: f64,
    pub min_price: f64,
    pub sound_enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            asset: DEFAULT_ASSET.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            push_url: DEFAULT_PUSH_URL.to_string(),
            pull_url: DEFAULT_PULL_URL.to_string(),
            reference_url: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            notification_gap: Duration::from_millis(DEFAULT_NOTIFICATION_GAP_MS),
            uptime_tick: Duration::from_millis(DEFAULT_UPTIME_TICK_MS),
            reference_refresh: Duration::from_millis(DEFAULT_REFERENCE_REFRESH_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            change_threshold_percent: DEFAULT_CHANGE_THRESHOLD_PERCENT,
            min_price: DEFAULT_MIN_PRICE,
            sound_enabled: DEFAULT_SOUND_ENABLED,
        }
    }
}

impl StreamArgs {
    /// Reads `QUOTE_STREAM_*` variables. Unset variables stay `None`; set but
    /// unparsable ones are rejected.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StreamError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            asset: read("ASSET"),
            currency: read("CURRENCY"),
            push_url: read("PUSH_URL"),
            pull_url: read("PULL_URL"),
            reference_url: read("REFERENCE_URL"),
            connect_timeout_ms: parse_var("CONNECT_TIMEOUT_MS", read("CONNECT_TIMEOUT_MS"))?,
            poll_interval_ms: parse_var("POLL_INTERVAL_MS", read("POLL_INTERVAL_MS"))?,
            notification_gap_ms: parse_var("NOTIFICATION_GAP_MS", read("NOTIFICATION_GAP_MS"))?,
            uptime_tick_ms: parse_var("UPTIME_TICK_MS", read("UPTIME_TICK_MS"))?,
            reference_refresh_ms: parse_var("REFERENCE_REFRESH_MS", read("REFERENCE_REFRESH_MS"))?,
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", read("REQUEST_TIMEOUT_MS"))?,
            history_capacity: parse_var("HISTORY_CAPACITY", read("HISTORY_CAPACITY"))?,
            change_threshold_percent: parse_var(
                "CHANGE_THRESHOLD_PERCENT",
                read("CHANGE_THRESHOLD_PERCENT"),
            )?,
            min_price: parse_var("MIN_PRICE", read("MIN_PRICE"))?,
            sound_enabled: parse_var("SOUND_ENABLED", read("SOUND_ENABLED"))?,
        })
    }

    pub fn normalize(self) -> Result<StreamConfig, StreamError> {
        let asset = normalize_code("asset", self.asset, DEFAULT_ASSET)?;
        let currency = normalize_code("currency", self.currency, DEFAULT_CURRENCY)?;

        let push_url = normalize_url("pushUrl", self.push_url, DEFAULT_PUSH_URL, &["ws://", "wss://"])?;
        let pull_url = normalize_url(
            "pullUrl",
            self.pull_url,
            DEFAULT_PULL_URL,
            &["http://", "https://"],
        )?;
        let reference_url = match self.reference_url {
            Some(url) => Some(normalize_url(
                "referenceUrl",
                Some(url),
                "",
                &["http://", "https://"],
            )?),
            None => None,
        };

        let connect_timeout = bounded_ms(
            "connectTimeoutMs",
            self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            MIN_CONNECT_TIMEOUT_MS,
            MAX_CONNECT_TIMEOUT_MS,
        )?;
        let poll_interval = bounded_ms(
            "pollIntervalMs",
            self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            MIN_POLL_INTERVAL_MS,
            MAX_POLL_INTERVAL_MS,
        )?;
        let notification_gap = bounded_ms(
            "notificationGapMs",
            self.notification_gap_ms.unwrap_or(DEFAULT_NOTIFICATION_GAP_MS),
            MIN_NOTIFICATION_GAP_MS,
            MAX_NOTIFICATION_GAP_MS,
        )?;
        let uptime_tick = bounded_ms(
            "uptimeTickMs",
            self.uptime_tick_ms.unwrap_or(DEFAULT_UPTIME_TICK_MS),
            MIN_UPTIME_TICK_MS,
            MAX_UPTIME_TICK_MS,
        )?;
        let reference_refresh = bounded_ms(
            "referenceRefreshMs",
            self.reference_refresh_ms.unwrap_or(DEFAULT_REFERENCE_REFRESH_MS),
            MIN_REFERENCE_REFRESH_MS,
            MAX_REFERENCE_REFRESH_MS,
        )?;
        let request_timeout = bounded_ms(
            "requestTimeoutMs",
            self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;

        let history_capacity = self.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY);
        if !(MIN_HISTORY_CAPACITY..=MAX_HISTORY_CAPACITY).contains(&history_capacity) {
            return Err(StreamError::InvalidArgument(format!(
                "historyCapacity must be between {MIN_HISTORY_CAPACITY} and {MAX_HISTORY_CAPACITY}"
            )));
        }

        let change_threshold_percent = self
            .change_threshold_percent
            .unwrap_or(DEFAULT_CHANGE_THRESHOLD_PERCENT);
        if !change_threshold_percent.is_finite() || change_threshold_percent < 0.0 {
            return Err(StreamError::InvalidArgument(
                "changeThresholdPercent must be a finite non-negative number".to_string(),
            ));
        }

        let min_price = self.min_price.unwrap_or(DEFAULT_MIN_PRICE);
        if !min_price.is_finite() || min_price < 0.0 {
            return Err(StreamError::InvalidArgument(
                "minPrice must be a finite non-negative number".to_string(),
            ));
        }

        Ok(StreamConfig {
            asset,
            currency,
            push_url,
            pull_url,
            reference_url,
            connect_timeout,
            poll_interval,
            notification_gap,
            uptime_tick,
            reference_refresh,
            request_timeout,
            history_capacity,
            change_threshold_percent,
            min_price,
            sound_enabled: self.sound_enabled.unwrap_or(DEFAULT_SOUND_ENABLED),
        })
    }
}

fn parse_var<T>(name: &str, raw: Option<String>) -> Result<Option<T>, StreamError>
where
    T: std::str::FromStr,
{
    match raw {
        Some(value) => value.parse::<T>().map(Some).map_err(|_| {
            StreamError::InvalidArgument(format!("{ENV_PREFIX}{name} has invalid value '{value}'"))
        }),
        None => Ok(None),
    }
}

fn normalize_code(field: &str, value: Option<String>, default: &str) -> Result<String, StreamError> {
    let code = value
        .unwrap_or_else(|| default.to_string())
        .trim()
        .to_ascii_uppercase();

    if code.is_empty() || !code.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(StreamError::InvalidArgument(format!(
            "{field} must be non-empty alphanumeric ASCII"
        )));
    }
    Ok(code)
}

fn normalize_url(
    field: &str,
    value: Option<String>,
    default: &str,
    schemes: &[&str],
) -> Result<String, StreamError> {
    let url = value.unwrap_or_else(|| default.to_string()).trim().to_string();
    let lowered = url.to_ascii_lowercase();
    if !schemes.iter().any(|scheme| lowered.starts_with(scheme)) || url.len() <= 8 {
        return Err(StreamError::InvalidArgument(format!(
            "{field} must start with one of {}",
            schemes.join(", ")
        )));
    }
    Ok(url)
}

fn bounded_ms(field: &str, value: u64, min: u64, max: u64) -> Result<Duration, StreamError> {
    if !(min..=max).contains(&value) {
        return Err(StreamError::InvalidArgument(format!(
            "{field} must be between {min} and {max}"
        )));
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn normalizes_defaults() {
        let config = StreamArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(config.asset, DEFAULT_ASSET);
        assert_eq!(config.currency, DEFAULT_CURRENCY);
        assert_eq!(config.push_url, DEFAULT_PUSH_URL);
        assert_eq!(config.pull_url, DEFAULT_PULL_URL);
        assert!(config.reference_url.is_none());
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.notification_gap, Duration::from_millis(400));
        assert_eq!(config.uptime_tick, Duration::from_secs(1));
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.change_threshold_percent, 0.1);
        assert!(!config.sound_enabled);
    }

    #[test]
    fn uppercases_asset_and_currency() {
        let config = StreamArgs {
            asset: Some(" xau ".to_string()),
            currency: Some("inr".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("lowercase codes should normalize");

        assert_eq!(config.asset, "XAU");
        assert_eq!(config.currency, "INR");
    }

    #[test]
    fn rejects_non_websocket_push_url() {
        let result = StreamArgs {
            push_url: Some("http://127.0.0.1:8001/ws".to_string()),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_poll_interval_range() {
        let result = StreamArgs {
            poll_interval_ms: Some(10),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_history_capacity_range() {
        let result = StreamArgs {
            history_capacity: Some(0),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_finite_threshold() {
        let result = StreamArgs {
            change_threshold_percent: Some(f64::NAN),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn reads_prefixed_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("QUOTE_STREAM_CURRENCY", "eur"),
            ("QUOTE_STREAM_POLL_INTERVAL_MS", "2500"),
            ("QUOTE_STREAM_SOUND_ENABLED", "true"),
            ("QUOTE_STREAM_REFERENCE_URL", "  "),
        ]);
        let args = StreamArgs::from_lookup(|key| vars.get(key).map(|value| value.to_string()))
            .expect("variables should parse");

        assert_eq!(args.currency.as_deref(), Some("eur"));
        assert_eq!(args.poll_interval_ms, Some(2_500));
        assert_eq!(args.sound_enabled, Some(true));
        assert!(args.reference_url.is_none());
    }

    #[test]
    fn rejects_unparsable_variable() {
        let result = StreamArgs::from_lookup(|key| {
            (key == "QUOTE_STREAM_CONNECT_TIMEOUT_MS").then(|| "soon".to_string())
        });

        assert!(result.is_err());
    }
}
