//! Partitioned bar archive with a per-file parse cache

use super::layout::{month_bounds, months_in_range, parse_month_dir, partition_path};
use super::parse::{parse_partition, DateOrderResolver, FirstComponentHeuristic, ParseOptions};
use super::{Bar, CacheStats, StoreError};
use crate::config::StoreConfig;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One cached partition. The slot's own lock serializes the first parse so a
/// file is read at most once even when several requests race for it.
type CacheSlot = Arc<Mutex<Option<Arc<[Bar]>>>>;

/// Serves time-ordered OHLCV history from a symbol/year/month archive
pub struct BarStore {
    root: PathBuf,
    extension: String,
    options: ParseOptions,
    resolver: Arc<dyn DateOrderResolver>,
    bars_per_day: usize,
    lookback_buffer_days: i64,
    cache: Mutex<HashMap<PathBuf, CacheSlot>>,
}

impl BarStore {
    /// Open an archive; fails when the root is not a directory
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if !config.root.is_dir() {
            return Err(StoreError::ArchiveMissing(config.root.clone()));
        }

        tracing::info!(root = ?config.root, "Opened bar archive");

        Ok(Self {
            root: config.root.clone(),
            extension: config.file_extension.clone(),
            options: config.parse_options(),
            resolver: Arc::new(FirstComponentHeuristic),
            bars_per_day: config.bars_per_day.max(1),
            lookback_buffer_days: config.lookback_buffer_days as i64,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the date-order heuristic used for `auto` files
    pub fn with_resolver(mut self, resolver: Arc<dyn DateOrderResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Archive root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Symbols with a top-level partition directory
    pub fn list_symbols(&self) -> BTreeSet<String> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = ?self.root, error = %e, "Failed to list archive");
                return BTreeSet::new();
            }
        };

        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect()
    }

    /// Exact, case-sensitive membership in [`Self::list_symbols`]
    pub fn is_available(&self, symbol: &str) -> bool {
        !symbol.is_empty() && self.list_symbols().contains(symbol)
    }

    /// First and last calendar day covered by the symbol's month directories
    pub fn date_range(&self, symbol: &str) -> Option<(NaiveDate, NaiveDate)> {
        if !self.is_available(symbol) {
            return None;
        }
        let partitions = self.partitions(symbol);
        let &(first_year, first_month) = partitions.first()?;
        let &(last_year, last_month) = partitions.last()?;
        let (start, _) = month_bounds(first_year, first_month)?;
        let (_, end) = month_bounds(last_year, last_month)?;
        Some((start, end))
    }

    /// The trailing `bars_back` bars at or before `as_of`, ascending
    ///
    /// Loads the months covering an estimated lookback window and widens the
    /// window one month at a time while short of `bars_back`.
    pub fn slice(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        bars_back: usize,
    ) -> Result<Vec<Bar>, StoreError> {
        self.ensure_available(symbol)?;
        if bars_back == 0 {
            return Ok(Vec::new());
        }

        let as_of_month = (as_of.year(), as_of.month());
        let eligible: Vec<(i32, u32)> = self
            .partitions(symbol)
            .into_iter()
            .filter(|p| *p <= as_of_month)
            .collect();

        // A window reaching past the representable calendar covers every partition
        let window_start = self
            .lookback_days(bars_back)
            .and_then(Duration::try_days)
            .and_then(|span| as_of.date_naive().checked_sub_signed(span));
        let mut first = match window_start {
            Some(start) => {
                let window_month = (start.year(), start.month());
                eligible
                    .iter()
                    .position(|p| *p >= window_month)
                    .unwrap_or(eligible.len())
            }
            None => 0,
        };

        let mut bars = Vec::new();
        for &(year, month) in &eligible[first..] {
            bars.extend(self.visible_bars(symbol, year, month, as_of)?);
        }

        while bars.len() < bars_back && first > 0 {
            first -= 1;
            let (year, month) = eligible[first];
            tracing::debug!(symbol, year, month, have = bars.len(), "Widening lookback window");
            let mut older = self.visible_bars(symbol, year, month, as_of)?;
            older.append(&mut bars);
            bars = older;
        }

        bars.sort_by_key(|b| b.timestamp);
        let excess = bars.len().saturating_sub(bars_back);
        bars.drain(..excess);

        tracing::debug!(symbol, %as_of, bars_back, returned = bars.len(), "Served slice");
        Ok(bars)
    }

    /// All bars with `start <= timestamp <= end`, ascending
    pub fn bars_between(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        self.ensure_available(symbol)?;

        let present: BTreeSet<(i32, u32)> = self.partitions(symbol).into_iter().collect();
        let mut bars = Vec::new();
        for (year, month) in months_in_range(start.date_naive(), end.date_naive()) {
            if !present.contains(&(year, month)) {
                continue;
            }
            let partition = self.load_partition(symbol, year, month)?;
            bars.extend(
                partition
                    .iter()
                    .filter(|b| b.timestamp >= start && b.timestamp <= end)
                    .cloned(),
            );
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// Current cache occupancy
    pub fn cache_stats(&self) -> CacheStats {
        let slots: Vec<CacheSlot> = self.cache.lock().values().cloned().collect();
        slots.iter().fold(CacheStats::default(), |mut stats, slot| {
            if let Some(bars) = slot.lock().as_ref() {
                stats.files += 1;
                stats.bars += bars.len();
            }
            stats
        })
    }

    fn ensure_available(&self, symbol: &str) -> Result<(), StoreError> {
        let available = self.list_symbols();
        if symbol.is_empty() || !available.contains(symbol) {
            return Err(StoreError::SymbolNotAvailable {
                symbol: symbol.to_string(),
                available: available.into_iter().collect(),
            });
        }
        Ok(())
    }

    /// Calendar days spanning `bars_back` session bars, plus the safety buffer
    fn lookback_days(&self, bars_back: usize) -> Option<i64> {
        let trading_days = i64::try_from(bars_back.div_ceil(self.bars_per_day)).ok()?;
        trading_days
            .checked_mul(7)?
            .checked_div(5)?
            .checked_add(1 + self.lookback_buffer_days)
    }

    /// `(year, month)` partitions present for a symbol, ascending
    fn partitions(&self, symbol: &str) -> Vec<(i32, u32)> {
        let symbol_dir = self.root.join(symbol);
        let mut partitions = Vec::new();

        for year_dir in read_subdirs(&symbol_dir) {
            let Some(year) = dir_name(&year_dir).and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            for month_dir in read_subdirs(&year_dir) {
                if let Some(month) = dir_name(&month_dir).and_then(parse_month_dir) {
                    partitions.push((year, month));
                }
            }
        }

        partitions.sort_unstable();
        partitions.dedup();
        partitions
    }

    fn visible_bars(
        &self,
        symbol: &str,
        year: i32,
        month: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let partition = self.load_partition(symbol, year, month)?;
        Ok(partition
            .iter()
            .filter(|b| b.timestamp <= as_of)
            .cloned()
            .collect())
    }

    /// Parse a partition once; later calls are cache hits. A month directory
    /// without its data file yields no bars and is not cached.
    fn load_partition(&self, symbol: &str, year: i32, month: u32) -> Result<Arc<[Bar]>, StoreError> {
        let Some(path) = partition_path(&self.root, symbol, year, month, &self.extension) else {
            return Ok(Arc::from(Vec::new()));
        };

        let slot = self.cache.lock().entry(path.clone()).or_default().clone();
        let mut cached = slot.lock();
        if let Some(bars) = cached.as_ref() {
            return Ok(bars.clone());
        }

        if !path.is_file() {
            tracing::debug!(path = ?path, "Partition file missing");
            return Ok(Arc::from(Vec::new()));
        }

        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let parsed = parse_partition(&content, symbol, &path, &self.options, self.resolver.as_ref());

        tracing::debug!(
            path = ?path,
            bars = parsed.bars.len(),
            skipped = parsed.skipped,
            date_order = ?parsed.date_order,
            "Parsed partition"
        );

        let bars: Arc<[Bar]> = parsed.bars.into();
        *cached = Some(bars.clone());
        Ok(bars)
    }
}

fn read_subdirs(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::parse::DateOrder;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn write_partition(root: &Path, symbol: &str, year: i32, month: u32, rows: &[String]) {
        let path = partition_path(root, symbol, year, month, "csv").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rows.join("\n")).unwrap();
    }

    /// Minute bars 09:30.. for the given days, day-first dates
    fn day_rows(year: i32, month: u32, days: &[u32], per_day: u32) -> Vec<String> {
        let mut rows = Vec::new();
        for &day in days {
            for i in 0..per_day {
                let close = 70 + i;
                rows.push(format!(
                    "{:02}/{:02}/{};{:02}:{:02};{}.00;{}.50;{}.00;{}.25;{}",
                    day,
                    month,
                    year,
                    9 + (30 + i) / 60,
                    (30 + i) % 60,
                    close,
                    close,
                    close,
                    close,
                    100 + i
                ));
            }
        }
        rows
    }

    fn store_at(dir: &TempDir) -> BarStore {
        let config = StoreConfig {
            root: dir.path().to_path_buf(),
            date_order: DateOrder::DayFirst,
            ..Default::default()
        };
        BarStore::open(&config).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_open_missing_root() {
        let config = StoreConfig {
            root: PathBuf::from("/nonexistent/archive"),
            ..Default::default()
        };
        assert!(matches!(
            BarStore::open(&config),
            Err(StoreError::ArchiveMissing(_))
        ));
    }

    #[test]
    fn test_list_symbols_and_availability() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 3));
        write_partition(dir.path(), "ES", 2023, 6, &day_rows(2023, 6, &[15], 3));
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("README.txt"), "not a symbol").unwrap();

        let store = store_at(&dir);
        let symbols: Vec<String> = store.list_symbols().into_iter().collect();
        assert_eq!(symbols, vec!["ES".to_string(), "MCL".to_string()]);
        assert!(store.is_available("MCL"));
        assert!(!store.is_available("mcl"));
        assert!(!store.is_available(""));
        assert!(!store.is_available("../MCL"));
    }

    #[test]
    fn test_date_range() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2022, 11, &day_rows(2022, 11, &[15], 1));
        write_partition(dir.path(), "MCL", 2023, 2, &day_rows(2023, 2, &[15], 1));

        let store = store_at(&dir);
        let (start, end) = store.date_range("MCL").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2022, 11, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());
        assert!(store.date_range("ZZZ").is_none());
    }

    #[test]
    fn test_slice_trailing_bars() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[14, 15], 10));

        let store = store_at(&dir);
        let as_of = utc(2023, 6, 15, 9, 35);
        let bars = store.slice("MCL", as_of, 4).unwrap();

        assert_eq!(bars.len(), 4);
        assert_eq!(bars.last().unwrap().timestamp, as_of);
        assert!(bars.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(bars.iter().all(|b| b.timestamp <= as_of && b.symbol == "MCL"));
        assert_eq!(bars[0].close, dec!(72.25));
    }

    #[test]
    fn test_slice_zero_bars_is_empty() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 5));
        let store = store_at(&dir);
        assert!(store.slice("MCL", utc(2023, 6, 16, 0, 0), 0).unwrap().is_empty());
    }

    #[test]
    fn test_slice_unknown_symbol_never_substitutes() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 5));
        let store = store_at(&dir);

        match store.slice("ZZZ", utc(2023, 6, 16, 0, 0), 10) {
            Err(StoreError::SymbolNotAvailable { symbol, available }) => {
                assert_eq!(symbol, "ZZZ");
                assert_eq!(available, vec!["MCL".to_string()]);
            }
            other => panic!("expected SymbolNotAvailable, got {:?}", other),
        }
    }

    #[test]
    fn test_slice_widens_past_gap() {
        let dir = TempDir::new().unwrap();
        // Data in January only; as_of in May leaves the estimated window empty
        write_partition(dir.path(), "MCL", 2023, 1, &day_rows(2023, 1, &[10], 5));
        fs::create_dir_all(dir.path().join("MCL/2023/05-May")).unwrap();

        let store = store_at(&dir);
        let bars = store.slice("MCL", utc(2023, 5, 20, 12, 0), 3).unwrap();
        assert_eq!(bars.len(), 3);
        assert!(bars.iter().all(|b| b.timestamp.month() == 1));
    }

    #[test]
    fn test_slice_before_archive_start_is_empty() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 5));
        let store = store_at(&dir);
        let bars = store.slice("MCL", utc(2020, 1, 1, 0, 0), 10).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn test_slice_huge_bars_back_returns_everything_visible() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 5, &day_rows(2023, 5, &[31], 4));
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 4));
        let store = store_at(&dir);
        let as_of = utc(2023, 6, 15, 12, 0);

        for bars_back in [usize::MAX, 100_000_000_000, 1 << 40] {
            let bars = store.slice("MCL", as_of, bars_back).unwrap();
            assert_eq!(bars.len(), 8, "bars_back = {}", bars_back);
            assert_eq!(bars[0].timestamp, utc(2023, 5, 31, 9, 30));
        }
    }

    #[test]
    fn test_lookback_days_overflow_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        assert_eq!(store.lookback_days(390), Some(9));
        let config = StoreConfig {
            root: dir.path().to_path_buf(),
            bars_per_day: 1,
            ..Default::default()
        };
        let per_bar = BarStore::open(&config).unwrap();
        assert_eq!(per_bar.lookback_days(usize::MAX), None);
    }

    struct AlwaysMonthFirst;

    impl DateOrderResolver for AlwaysMonthFirst {
        fn resolve(&self, _dates: &[&str]) -> Option<DateOrder> {
            Some(DateOrder::MonthFirst)
        }
    }

    #[test]
    fn test_with_resolver_overrides_auto_detection() {
        let dir = TempDir::new().unwrap();
        // No component above 12, so the built-in heuristic has no evidence
        let rows = vec![
            "05/06/2023;09:30;70.00;70.50;69.50;70.25;100".to_string(),
            "06/06/2023;09:30;71.00;71.50;70.50;71.25;100".to_string(),
        ];
        write_partition(dir.path(), "MCL", 2023, 6, &rows);
        let config = StoreConfig {
            root: dir.path().to_path_buf(),
            date_order: DateOrder::Auto,
            ambiguous_date_order: DateOrder::DayFirst,
            ..Default::default()
        };

        let default_store = BarStore::open(&config).unwrap();
        let bars = default_store
            .bars_between("MCL", utc(2023, 1, 1, 0, 0), utc(2023, 12, 31, 0, 0))
            .unwrap();
        assert_eq!(bars[0].timestamp, utc(2023, 6, 5, 9, 30));

        let overridden = BarStore::open(&config)
            .unwrap()
            .with_resolver(Arc::new(AlwaysMonthFirst));
        let bars = overridden
            .bars_between("MCL", utc(2023, 1, 1, 0, 0), utc(2023, 12, 31, 0, 0))
            .unwrap();
        assert_eq!(bars[0].timestamp, utc(2023, 5, 6, 9, 30));
        assert_eq!(bars[1].timestamp, utc(2023, 6, 6, 9, 30));
    }

    #[test]
    fn test_partition_parsed_once() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 5));
        let store = store_at(&dir);

        store.slice("MCL", utc(2023, 6, 30, 0, 0), 2).unwrap();
        // Rewriting the file must not change cached results
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 1));
        let bars = store.slice("MCL", utc(2023, 6, 30, 0, 0), 10).unwrap();

        assert_eq!(bars.len(), 5);
        assert_eq!(store.cache_stats(), CacheStats { files: 1, bars: 5 });
    }

    #[test]
    fn test_concurrent_first_access() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[15], 20));
        let store = Arc::new(store_at(&dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.slice("MCL", utc(2023, 6, 30, 0, 0), 20).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().len(), 20);
        }
        assert_eq!(store.cache_stats().files, 1);
    }

    #[test]
    fn test_bars_between() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "MCL", 2023, 5, &day_rows(2023, 5, &[31], 2));
        write_partition(dir.path(), "MCL", 2023, 6, &day_rows(2023, 6, &[1, 2], 2));

        let store = store_at(&dir);
        let bars = store
            .bars_between("MCL", utc(2023, 5, 31, 9, 31), utc(2023, 6, 1, 23, 59))
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].timestamp, utc(2023, 5, 31, 9, 31));
        assert_eq!(bars[2].timestamp, utc(2023, 6, 1, 9, 31));
    }
}
