//! Archive layout: `<root>/<SYMBOL>/<YEAR>/<MM-MonthName>/<SYMBOL>_<YEAR>_<MM>_<MonthName>.<ext>`

use chrono::{Datelike, Month, NaiveDate};
use std::path::{Path, PathBuf};

/// English month name for 1..=12
fn month_name(month: u32) -> Option<&'static str> {
    let month = u8::try_from(month).ok()?;
    Month::try_from(month).ok().map(|m| m.name())
}

/// Month directory name, e.g. `06-June`
pub fn month_dir_name(month: u32) -> Option<String> {
    month_name(month).map(|name| format!("{:02}-{}", month, name))
}

/// Partition file name, e.g. `MCL_2023_06_June.csv`
pub fn partition_file_name(symbol: &str, year: i32, month: u32, ext: &str) -> Option<String> {
    month_name(month).map(|name| format!("{}_{}_{:02}_{}.{}", symbol, year, month, name, ext))
}

/// Full path of one symbol-month partition
pub fn partition_path(
    root: &Path,
    symbol: &str,
    year: i32,
    month: u32,
    ext: &str,
) -> Option<PathBuf> {
    Some(
        root.join(symbol)
            .join(year.to_string())
            .join(month_dir_name(month)?)
            .join(partition_file_name(symbol, year, month, ext)?),
    )
}

/// Month number from a month directory name (`06-June` -> 6)
pub fn parse_month_dir(name: &str) -> Option<u32> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    let month: u32 = digits.parse().ok()?;
    (1..=12).contains(&month).then_some(month)
}

/// First and last calendar day of a month
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

/// All `(year, month)` pairs touching `[start, end]`, ascending
pub fn months_in_range(start: NaiveDate, end: NaiveDate) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    if start > end {
        return months;
    }
    let (mut year, mut month) = (start.year(), start.month());
    let last = (end.year(), end.month());
    while (year, month) <= last {
        months.push((year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_path() {
        let path = partition_path(Path::new("/data"), "MCL", 2023, 6, "csv").unwrap();
        assert_eq!(
            path,
            PathBuf::from("/data/MCL/2023/06-June/MCL_2023_06_June.csv")
        );
    }

    #[test]
    fn test_invalid_month() {
        assert!(month_dir_name(0).is_none());
        assert!(month_dir_name(13).is_none());
        assert!(partition_file_name("MCL", 2023, 13, "csv").is_none());
    }

    #[test]
    fn test_parse_month_dir() {
        assert_eq!(parse_month_dir("06-June"), Some(6));
        assert_eq!(parse_month_dir("12-December"), Some(12));
        assert_eq!(parse_month_dir("13-Nope"), None);
        assert_eq!(parse_month_dir("June"), None);
    }

    #[test]
    fn test_month_bounds_december() {
        let (first, last) = month_bounds(2023, 12).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn test_month_bounds_leap_february() {
        let (_, last) = month_bounds(2024, 2).unwrap();
        assert_eq!(last, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn test_months_in_range_crosses_year() {
        let start = NaiveDate::from_ymd_opt(2022, 11, 20).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 2, 3).unwrap();
        assert_eq!(
            months_in_range(start, end),
            vec![(2022, 11), (2022, 12), (2023, 1), (2023, 2)]
        );
    }

    #[test]
    fn test_months_in_range_reversed_is_empty() {
        let start = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
        assert!(months_in_range(start, end).is_empty());
    }
}
