//! Shared fixtures: a small on-disk archive
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use strategy_bridge::config::StoreConfig;
use strategy_bridge::store::layout::partition_path;
use strategy_bridge::store::BarStore;
use tempfile::TempDir;

/// `count` one-minute rows in `DD/MM/YYYY;HH:MM;o;h;l;c;v` form
pub fn minute_rows(date: &str, start: (u32, u32), count: u32, base: f64) -> Vec<String> {
    (0..count)
        .map(|i| {
            let minutes = start.0 * 60 + start.1 + i;
            let open = base + f64::from(i) * 0.01;
            format!(
                "{};{:02}:{:02};{:.2};{:.2};{:.2};{:.2};{}",
                date,
                minutes / 60,
                minutes % 60,
                open,
                open + 0.10,
                open - 0.10,
                open + 0.05,
                100 + i
            )
        })
        .collect()
}

pub fn write_partition(root: &Path, symbol: &str, year: i32, month: u32, rows: &[String]) {
    let path = partition_path(root, symbol, year, month, "csv").unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, rows.join("\n") + "\n").unwrap();
}

/// MCL: 31 May, 14 and 15 June 2023 (11:50-12:09 each day).
/// ES: 13 June 2023.
pub fn build_archive() -> TempDir {
    let dir = TempDir::new().unwrap();

    write_partition(dir.path(), "MCL", 2023, 5, &minute_rows("31/05/2023", (11, 50), 20, 68.0));

    let mut june = minute_rows("14/06/2023", (11, 50), 20, 69.0);
    june.extend(minute_rows("15/06/2023", (11, 50), 20, 70.0));
    write_partition(dir.path(), "MCL", 2023, 6, &june);

    write_partition(dir.path(), "ES", 2023, 6, &minute_rows("13/06/2023", (11, 50), 20, 4300.0));

    dir
}

pub fn store_config(root: &Path) -> StoreConfig {
    StoreConfig {
        root: root.to_path_buf(),
        ..Default::default()
    }
}

pub fn open_store(root: &Path) -> Arc<BarStore> {
    Arc::new(BarStore::open(&store_config(root)).unwrap())
}
