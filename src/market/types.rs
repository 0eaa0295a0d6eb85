use crate::error::StreamError;
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ConnectedPush,
    ConnectedPull,
    Paused,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedPush | Self::ConnectedPull)
    }

    /// States in which `connect()` must not start another negotiation.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ConnectedPush | Self::ConnectedPull
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ConnectedPush => "connected_push",
            Self::ConnectedPull => "connected_pull",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Push,
    Pull,
}

/// One accepted sample. Only built after the price passed validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub asset: String,
    pub currency: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub timestamp: DateTime<Utc>,
    pub source: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(rename = "high24h", skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<f64>,
    #[serde(rename = "low24h", skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<f64>,
}

impl PriceUpdate {
    pub fn direction(&self) -> PriceDirection {
        PriceDirection::from_change(self.change)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    Flat,
}

impl PriceDirection {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Self::Up
        } else if change < 0.0 {
            Self::Down
        } else {
            Self::Flat
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamingStats {
    pub messages_received: u64,
    pub reconnect_attempts: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub latency_ms: i64,
    pub uptime_ms: u64,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub history: Vec<PriceUpdate>,
    pub stats: StreamingStats,
    pub timestamp: DateTime<Utc>,
}

impl StreamSnapshot {
    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(simd_json::serde::to_string(self)?)
    }
}

/// Cheap status view kept outside the manager task so callers can read it without a
/// round trip.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusSnapshot {
    pub state: ConnectionState,
    pub connected: bool,
    pub asset: String,
    pub currency: String,
    pub last_price: Option<f64>,
    pub messages_received: u64,
    pub reconnect_attempts: u64,
    pub latency_ms: i64,
    pub reason: Option<String>,
}

impl StreamStatusSnapshot {
    pub fn disconnected(asset: String, currency: String, reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected: false,
            asset,
            currency,
            last_price: None,
            messages_received: 0,
            reconnect_attempts: 0,
            latency_ms: 0,
            reason,
        }
    }
}

/// A loosely typed numeric field. Feeds are not trusted to send JSON numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

impl RawNumber {
    /// Numeric reading without any range checks; `None` for anything non-numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<f64>().ok(),
            Self::Other(_) => None,
        }
    }

    pub fn as_finite(&self) -> Option<f64> {
        self.as_f64().filter(|value| value.is_finite())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    UnixMillis(i64),
    Text(String),
    Other(IgnoredAny),
}

impl RawTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::UnixMillis(millis) => DateTime::<Utc>::from_timestamp_millis(*millis),
            Self::Text(text) => parse_timestamp_text(text),
            Self::Other(_) => None,
        }
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Push message body. `usdPerOunce` is the gold feed's alias for `price`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayloadWire {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub price: Option<RawNumber>,
    #[serde(default)]
    pub usd_per_ounce: Option<RawNumber>,
    #[serde(default)]
    pub change: Option<RawNumber>,
    #[serde(default)]
    pub change_percent: Option<RawNumber>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub volume: Option<RawNumber>,
    #[serde(default, rename = "high24h")]
    pub high_24h: Option<RawNumber>,
    #[serde(default, rename = "low24h")]
    pub low_24h: Option<RawNumber>,
}

pub fn parse_push_payload(payload: &mut [u8]) -> Result<PushPayloadWire, StreamError> {
    Ok(simd_json::serde::from_slice(payload)?)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotMetaWire {
    #[serde(default)]
    pub ch: Option<RawNumber>,
    #[serde(default)]
    pub chp: Option<RawNumber>,
}

/// `GET /spot` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotWire {
    #[serde(default)]
    pub usd_per_ounce: Option<RawNumber>,
    #[serde(default)]
    pub as_of: Option<RawTimestamp>,
    #[serde(default)]
    pub meta: Option<SpotMetaWire>,
}

pub fn parse_spot_payload(payload: &mut [u8]) -> Result<SpotWire, StreamError> {
    Ok(simd_json::serde::from_slice(payload)?)
}

/// Transport-neutral sample handed to the pipeline before validation.
#[derive(Debug, Clone, Default)]
pub struct RawQuote {
    pub asset: Option<String>,
    pub currency: Option<String>,
    pub price: Option<RawNumber>,
    pub change: Option<RawNumber>,
    pub change_percent: Option<RawNumber>,
    pub timestamp: Option<RawTimestamp>,
    pub volume: Option<RawNumber>,
    pub high_24h: Option<RawNumber>,
    pub low_24h: Option<RawNumber>,
}

impl From<PushPayloadWire> for RawQuote {
    fn from(value: PushPayloadWire) -> Self {
        Self {
            asset: value.asset,
            currency: value.currency,
            price: value.price.or(value.usd_per_ounce),
            change: value.change,
            change_percent: value.change_percent,
            timestamp: value.timestamp,
            volume: value.volume,
            high_24h: value.high_24h,
            low_24h: value.low_24h,
        }
    }
}

impl From<SpotWire> for RawQuote {
    fn from(value: SpotWire) -> Self {
        let (change, change_percent) = match value.meta {
            Some(meta) => (meta.ch, meta.chp),
            None => (None, None),
        };
        Self {
            price: value.usd_per_ounce,
            change,
            change_percent,
            timestamp: value.as_of,
            ..Default::default()
        }
    }
}

/// One row of the "last prices" lookup used to seed change derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePrice {
    pub price: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceRowWire {
    #[serde(default)]
    pub ds: Option<RawTimestamp>,
    #[serde(default)]
    pub price: Option<RawNumber>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferencePricesWire {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub prices: Vec<ReferenceRowWire>,
}

impl ReferencePricesWire {
    /// Keeps rows whose price is finite; order (newest first) is preserved.
    pub fn into_reference_prices(self) -> Vec<ReferencePrice> {
        self.prices
            .into_iter()
            .filter_map(|row| {
                let price = row.price.as_ref().and_then(RawNumber::as_finite)?;
                Some(ReferencePrice {
                    price,
                    observed_at: row.ds.as_ref().and_then(RawTimestamp::to_datetime),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_push_payload_with_price_alias() {
        let mut payload =
            br#"{"usdPerOunce":"2345.60","changePercent":0.2,"timestamp":"2025-01-20T10:00:00Z"}"#
                .to_vec();
        let wire = parse_push_payload(&mut payload).expect("payload should parse");
        let quote = RawQuote::from(wire);

        assert_eq!(quote.price.and_then(|raw| raw.as_finite()), Some(2345.6));
        assert!(quote.change.is_none());
        assert_eq!(
            quote.timestamp.and_then(|raw| raw.to_datetime()),
            DateTime::parse_from_rfc3339("2025-01-20T10:00:00Z")
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc))
        );
    }

    #[test]
    fn prefers_price_over_alias() {
        let mut payload = br#"{"price":10.5,"usdPerOunce":99.0}"#.to_vec();
        let quote = RawQuote::from(parse_push_payload(&mut payload).expect("payload should parse"));

        assert_eq!(quote.price.and_then(|raw| raw.as_finite()), Some(10.5));
    }

    #[test]
    fn keeps_garbage_fields_as_other() {
        let mut payload = br#"{"price":{"nested":true},"volume":null}"#.to_vec();
        let wire = parse_push_payload(&mut payload).expect("payload should parse");

        assert!(matches!(wire.price, Some(RawNumber::Other(_))));
        assert!(wire.volume.is_none());
    }

    #[test]
    fn maps_spot_meta_to_upstream_change() {
        let mut payload =
            br#"{"usdPerOunce":2400.1,"asOf":"2025-01-20T10:00:00Z","meta":{"ch":-3.2,"chp":-0.13}}"#
                .to_vec();
        let quote = RawQuote::from(parse_spot_payload(&mut payload).expect("spot should parse"));

        assert_eq!(quote.change.and_then(|raw| raw.as_finite()), Some(-3.2));
        assert_eq!(quote.change_percent.and_then(|raw| raw.as_finite()), Some(-0.13));
    }

    #[test]
    fn parses_numeric_timestamps_as_unix_millis() {
        let raw = RawTimestamp::UnixMillis(1_735_000_000_000);
        let parsed = raw.to_datetime().expect("millis should convert");
        assert_eq!(parsed.timestamp_millis(), 1_735_000_000_000);

        let text = RawTimestamp::Text("1735000000000".to_string());
        assert_eq!(text.to_datetime(), Some(parsed));
    }

    #[test]
    fn filters_reference_rows_without_finite_price() {
        let mut payload =
            br#"{"count":3,"prices":[{"ds":"2025-01-21","price":2055.75},{"ds":"2025-01-20","price":"NaN"},{"ds":"2025-01-19","price":2050.5}]}"#
                .to_vec();
        let wire: ReferencePricesWire =
            simd_json::serde::from_slice(&mut payload).expect("reference payload should parse");
        let prices = wire.into_reference_prices();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].price, 2055.75);
        assert_eq!(prices[1].price, 2050.5);
    }

    #[test]
    fn only_live_states_block_connect() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::ConnectedPull.is_active());
        assert!(!ConnectionState::Paused.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(ConnectionState::ConnectedPush.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
