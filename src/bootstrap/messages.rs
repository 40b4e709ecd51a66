//! Historical data wire messages

use crate::store::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// `dataSource` tag of bars served from the archive
pub const REAL_MARKET_DATA: &str = "REAL_MARKET_DATA";

/// Request timestamp as sent by strategies: text or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestTimestamp {
    EpochMillis(i64),
    Text(String),
}

impl RequestTimestamp {
    /// The instant, if the value can be read
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            RequestTimestamp::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            RequestTimestamp::Text(text) => parse_instant(text),
        }
    }
}

/// "Give me `bars_back` bars of `symbol` as of `timestamp`"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataRequest {
    /// Correlation key echoed in the response
    pub request_id: String,
    pub symbol: String,
    pub bars_back: usize,
    /// As-of instant; the simulation clock applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<RequestTimestamp>,
}

/// Bar on the wire: `t,o,h,l,c,v`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBar {
    #[serde(deserialize_with = "lenient_instant")]
    pub t: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub o: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub h: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub l: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub c: Decimal,
    pub v: u64,
}

impl From<&Bar> for WireBar {
    fn from(bar: &Bar) -> Self {
        Self {
            t: bar.timestamp,
            o: bar.open,
            h: bar.high,
            l: bar.low,
            c: bar.close,
            v: bar.volume,
        }
    }
}

/// Body of a successful response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalData {
    pub bars: Vec<WireBar>,
    pub symbol: String,
    pub bars_requested: usize,
    pub bars_returned: usize,
    pub data_source: String,
    /// The as-of instant the slice was cut at
    #[serde(deserialize_with = "lenient_instant")]
    pub end_datetime: DateTime<Utc>,
}

/// Answer to a [`HistoricalDataRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HistoricalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoricalDataResponse {
    /// Successful response carrying archive bars
    pub fn success(
        request_id: impl Into<String>,
        symbol: impl Into<String>,
        bars: &[Bar],
        bars_requested: usize,
        as_of: DateTime<Utc>,
    ) -> Self {
        let bars: Vec<WireBar> = bars.iter().map(WireBar::from).collect();
        Self {
            request_id: request_id.into(),
            success: true,
            data: Some(HistoricalData {
                bars_returned: bars.len(),
                bars,
                symbol: symbol.into(),
                bars_requested,
                data_source: REAL_MARKET_DATA.to_string(),
                end_datetime: as_of,
            }),
            error: None,
        }
    }

    /// Terminal failure for a request
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Number of bars carried
    pub fn bars_returned(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.bars_returned)
    }
}

/// Parse RFC 3339, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` (read as UTC) or a bare date
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Deserialize an instant with [`parse_instant`]
pub fn lenient_instant<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RequestTimestamp::deserialize(deserializer)?;
    raw.resolve()
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", raw)))
}
