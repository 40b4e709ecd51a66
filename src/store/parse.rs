//! Partition file parsing
//!
//! Rows carry `date, time, open, high, low, close, volume`. The date field is
//! ambiguous between day-first and month-first; the order is either fixed by
//! configuration or resolved per file by a [`DateOrderResolver`].

use super::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Field order of two-component dates (`a/b/yyyy`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    /// Detect per file
    #[default]
    Auto,
    /// `dd/mm/yyyy`
    DayFirst,
    /// `mm/dd/yyyy`
    MonthFirst,
}

/// Decides the date order of a file from a sample of its date fields
pub trait DateOrderResolver: Send + Sync {
    /// Returns `None` when the sample holds no evidence either way
    fn resolve(&self, dates: &[&str]) -> Option<DateOrder>;
}

/// Counts components that exceed 12: a first component above 12 can only be a
/// day, a second component above 12 can only be a day in month-first order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstComponentHeuristic;

impl DateOrderResolver for FirstComponentHeuristic {
    fn resolve(&self, dates: &[&str]) -> Option<DateOrder> {
        let mut day_first = 0usize;
        let mut month_first = 0usize;

        for date in dates {
            let Some((a, b)) = leading_components(date) else {
                continue;
            };
            if a > 12 && b <= 12 {
                day_first += 1;
            } else if b > 12 && a <= 12 {
                month_first += 1;
            }
        }

        match day_first.cmp(&month_first) {
            std::cmp::Ordering::Greater => Some(DateOrder::DayFirst),
            std::cmp::Ordering::Less => Some(DateOrder::MonthFirst),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// First two numeric components of a non-ISO date
fn leading_components(date: &str) -> Option<(u32, u32)> {
    let mut parts = date.trim().split(['/', '.', '-']);
    let first = parts.next()?;
    if first.len() == 4 {
        return None; // year-first, unambiguous
    }
    let second = parts.next()?;
    Some((first.trim().parse().ok()?, second.trim().parse().ok()?))
}

/// Parser settings derived from the store configuration
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Field delimiter; sniffed from the first line when `None`
    pub delimiter: Option<u8>,
    /// Fixed order, or `Auto` to consult the resolver
    pub date_order: DateOrder,
    /// Order used when the resolver finds no evidence
    pub ambiguous_date_order: DateOrder,
    /// Rows sampled by the resolver
    pub sample_rows: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            date_order: DateOrder::Auto,
            ambiguous_date_order: DateOrder::MonthFirst,
            sample_rows: 200,
        }
    }
}

/// Result of parsing one partition file
#[derive(Debug, Clone)]
pub struct ParsedPartition {
    /// Bars in file order
    pub bars: Vec<Bar>,
    /// Rows rejected as malformed
    pub skipped: usize,
    /// Order the dates were read with
    pub date_order: DateOrder,
}

#[derive(Debug, Error)]
enum RowError {
    #[error("expected at least 6 fields, found {0}")]
    TooFewFields(usize),
    #[error("unparseable date '{0}'")]
    Date(String),
    #[error("unparseable time '{0}'")]
    Time(String),
    #[error("non-numeric {field} '{value}'")]
    Number { field: &'static str, value: String },
}

/// Pick the most frequent candidate delimiter on the first non-empty line
pub fn sniff_delimiter(content: &str) -> u8 {
    let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    [b';', b',', b'\t']
        .into_iter()
        .map(|d| (d, line.bytes().filter(|b| *b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

/// Parse a partition file's content into bars, skipping malformed rows
pub fn parse_partition(
    content: &str,
    symbol: &str,
    source: &Path,
    options: &ParseOptions,
    resolver: &dyn DateOrderResolver,
) -> ParsedPartition {
    let delimiter = options.delimiter.unwrap_or_else(|| sniff_delimiter(content));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut skipped = 0usize;
    let mut records = Vec::new();
    for (index, result) in reader.records().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                tracing::warn!(path = ?source, row = index + 1, error = %e, "Skipping unreadable row");
            }
        }
    }

    let date_order = match options.date_order {
        DateOrder::Auto => {
            let sample: Vec<&str> = records
                .iter()
                .take(options.sample_rows)
                .filter_map(|r| split_row(r).ok().map(|row| row.date))
                .collect();
            resolver.resolve(&sample).unwrap_or(options.ambiguous_date_order)
        }
        fixed => fixed,
    };

    let mut bars = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        match parse_row(record, symbol, date_order) {
            Ok(bar) => bars.push(bar),
            // A leading non-date row is a header
            Err(RowError::Date(_)) if index == 0 => {
                tracing::debug!(path = ?source, "Skipping header row");
            }
            Err(e) => {
                skipped += 1;
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                tracing::warn!(path = ?source, line, error = %e, "Skipping malformed row");
            }
        }
    }

    if skipped > 0 {
        crate::telemetry::increment(crate::telemetry::CounterMetric::RowsSkipped, skipped as u64);
    }

    ParsedPartition {
        bars,
        skipped,
        date_order,
    }
}

struct RawRow<'a> {
    date: &'a str,
    time: Option<&'a str>,
    values: [&'a str; 5],
}

fn split_row(record: &csv::StringRecord) -> Result<RawRow<'_>, RowError> {
    let fields: Vec<&str> = record.iter().collect();
    match fields.len() {
        n if n >= 7 => Ok(RawRow {
            date: fields[0],
            time: Some(fields[1]),
            values: [fields[2], fields[3], fields[4], fields[5], fields[6]],
        }),
        6 => {
            // Combined `date time` or `dateTtime` first field
            let (date, time) = match fields[0].split_once([' ', 'T']) {
                Some((d, t)) => (d, Some(t.trim())),
                None => (fields[0], None),
            };
            Ok(RawRow {
                date,
                time,
                values: [fields[1], fields[2], fields[3], fields[4], fields[5]],
            })
        }
        n => Err(RowError::TooFewFields(n)),
    }
}

fn parse_row(record: &csv::StringRecord, symbol: &str, order: DateOrder) -> Result<Bar, RowError> {
    let row = split_row(record)?;
    let date = parse_date(row.date, order).ok_or_else(|| RowError::Date(row.date.to_string()))?;
    let time = match row.time {
        Some(t) if !t.is_empty() => parse_time(t).ok_or_else(|| RowError::Time(t.to_string()))?,
        _ => NaiveTime::MIN,
    };

    let [open, high, low, close, volume] = row.values;
    Ok(Bar {
        symbol: symbol.to_string(),
        timestamp: to_utc(NaiveDateTime::new(date, time)),
        open: parse_decimal("open", open)?,
        high: parse_decimal("high", high)?,
        low: parse_decimal("low", low)?,
        close: parse_decimal("close", close)?,
        volume: parse_volume(volume)?,
    })
}

/// Parse `dd/mm/yyyy`, `mm/dd/yyyy` (per `order`) or `yyyy-mm-dd`
pub fn parse_date(value: &str, order: DateOrder) -> Option<NaiveDate> {
    let parts: Vec<&str> = value.trim().split(['/', '.', '-']).map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<_>>()?;

    if parts[0].len() == 4 {
        return NaiveDate::from_ymd_opt(nums[0] as i32, nums[1], nums[2]);
    }

    let year = if parts[2].len() == 2 {
        2000 + nums[2] as i32
    } else {
        nums[2] as i32
    };
    let (month, day) = match order {
        DateOrder::DayFirst => (nums[1], nums[0]),
        DateOrder::MonthFirst | DateOrder::Auto => (nums[0], nums[1]),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, RowError> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| RowError::Number {
            field,
            value: value.to_string(),
        })
}

fn parse_volume(value: &str) -> Result<u64, RowError> {
    value
        .parse::<u64>()
        .ok()
        .or_else(|| Decimal::from_str(value).ok().and_then(|d| d.trunc().to_u64()))
        .ok_or_else(|| RowError::Number {
            field: "volume",
            value: value.to_string(),
        })
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}
