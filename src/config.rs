//! Configuration types for strategy-bridge

use crate::broker::topics;
use crate::store::{DateOrder, ParseOptions};
use crate::telemetry::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Bar archive configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Archive root (`<root>/<SYMBOL>/<YEAR>/<MM-MonthName>/...`)
    pub root: PathBuf,
    /// Partition file extension
    pub file_extension: String,
    /// Field delimiter; sniffed per file when unset
    pub delimiter: Option<char>,
    /// Date field order; `auto` detects per file
    pub date_order: DateOrder,
    /// Order assumed when detection finds no evidence
    pub ambiguous_date_order: DateOrder,
    /// Rows sampled for detection
    pub detection_sample_rows: usize,
    /// Bars per trading day, for lookback estimation
    pub bars_per_day: usize,
    /// Extra calendar days added to the lookback window
    pub lookback_buffer_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            file_extension: "csv".to_string(),
            delimiter: None,
            date_order: DateOrder::Auto,
            ambiguous_date_order: DateOrder::MonthFirst,
            detection_sample_rows: 200,
            bars_per_day: 390,
            lookback_buffer_days: 7,
        }
    }
}

impl StoreConfig {
    /// Parser settings for this archive
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            delimiter: self
                .delimiter
                .filter(char::is_ascii)
                .map(|c| c as u8),
            date_order: self.date_order,
            ambiguous_date_order: match self.ambiguous_date_order {
                DateOrder::Auto => DateOrder::MonthFirst,
                fixed => fixed,
            },
            sample_rows: self.detection_sample_rows.max(1),
        }
    }
}

/// Bootstrap service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_request_topic")]
    pub request_topic: String,
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
    /// Upper bound applied to `barsBack`
    #[serde(default = "default_max_bars_back")]
    pub max_bars_back: usize,
    /// Receive timeout of the listener loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on joining the listener during stop
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_request_topic() -> String {
    topics::HISTORICAL_REQUEST.to_string()
}
fn default_response_topic() -> String {
    topics::HISTORICAL_RESPONSE.to_string()
}
fn default_max_bars_back() -> usize {
    5000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_stop_timeout_ms() -> u64 {
    2000
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            request_topic: default_request_topic(),
            response_topic: default_response_topic(),
            max_bars_back: default_max_bars_back(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl BootstrapConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Process bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Identifier the strategy uses in topics and its ready marker
    pub bot_id: String,
    /// How long `start` waits for the ready marker
    pub ready_timeout_ms: u64,
    /// Fail `start` instead of continuing unconfirmed on timeout
    pub ready_timeout_fatal: bool,
    /// Bounded wait for a signal after each bar
    pub signal_wait_ms: u64,
    /// Time the process gets to exit after the shutdown notice
    pub shutdown_grace_ms: u64,
    /// Bound on joining each background task
    pub join_timeout_ms: u64,
    /// Poll interval of readiness checks and listener loops
    pub poll_interval_ms: u64,
    /// Case-insensitive substrings that mark a ready log line
    pub ready_patterns: Vec<String>,
    /// Relay broker traffic over the process's stdin/stdout
    pub relay_stdio: bool,
    /// Move the simulation clock to each processed bar
    pub advance_clock: bool,
    /// Capacity of the internal signal queue
    pub signal_queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bot_id: "bot-1".to_string(),
            ready_timeout_ms: 30_000,
            ready_timeout_fatal: false,
            signal_wait_ms: 50,
            shutdown_grace_ms: 3_000,
            join_timeout_ms: 1_000,
            poll_interval_ms: 50,
            ready_patterns: vec!["ready".to_string()],
            relay_stdio: true,
            advance_clock: false,
            signal_queue_capacity: 1024,
        }
    }
}

impl BridgeConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn signal_wait(&self) -> Duration {
        Duration::from_millis(self.signal_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// External strategy process
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Executable to run
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            [store]
            root = "/archive"
            file_extension = "txt"
            delimiter = ";"
            date_order = "day_first"

            [bootstrap]
            max_bars_back = 1000

            [bridge]
            bot_id = "mcl-trend"
            ready_timeout_ms = 5000
            ready_timeout_fatal = true
            ready_patterns = ["ready", "initialized"]

            [strategy]
            command = "node"
            args = ["strategy.js", "--bot", "mcl-trend"]

            [strategy.env]
            NODE_ENV = "backtest"

            [telemetry]
            log_level = "debug"
            log_format = "json"
            metrics_port = 9090
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.store.root, PathBuf::from("/archive"));
        assert_eq!(config.store.date_order, DateOrder::DayFirst);
        assert_eq!(config.store.delimiter, Some(';'));
        assert_eq!(config.store.bars_per_day, 390);
        assert_eq!(config.bootstrap.max_bars_back, 1000);
        assert_eq!(config.bootstrap.request_topic, "historical-data:request");
        assert_eq!(config.bridge.bot_id, "mcl-trend");
        assert!(config.bridge.ready_timeout_fatal);
        assert_eq!(config.bridge.signal_wait_ms, 50);
        assert_eq!(config.strategy.args.len(), 3);
        assert_eq!(config.strategy.env["NODE_ENV"], "backtest");
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert_eq!(config.telemetry.metrics_port, Some(9090));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store.file_extension, "csv");
        assert_eq!(config.store.date_order, DateOrder::Auto);
        assert_eq!(config.bootstrap.response_topic, "historical-data:response");
        assert_eq!(config.bootstrap.max_bars_back, 5000);
        assert_eq!(config.bridge.ready_patterns, vec!["ready".to_string()]);
        assert!(config.bridge.relay_stdio);
        assert!(!config.bridge.ready_timeout_fatal);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.telemetry.metrics_port.is_none());
    }

    #[test]
    fn test_parse_options_from_store_config() {
        let config = StoreConfig {
            delimiter: Some('\t'),
            ambiguous_date_order: DateOrder::Auto,
            ..Default::default()
        };
        let options = config.parse_options();
        assert_eq!(options.delimiter, Some(b'\t'));
        assert_eq!(options.ambiguous_date_order, DateOrder::MonthFirst);
    }

    #[test]
    fn test_non_ascii_delimiter_falls_back_to_sniffing() {
        let config = StoreConfig {
            delimiter: Some('§'),
            ..Default::default()
        };
        assert_eq!(config.parse_options().delimiter, None);
    }

    #[test]
    fn test_durations() {
        let bridge = BridgeConfig::default();
        assert_eq!(bridge.signal_wait(), Duration::from_millis(50));
        assert_eq!(bridge.ready_timeout(), Duration::from_secs(30));
        assert_eq!(BootstrapConfig::default().poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../config.toml.example")).unwrap();
        assert_eq!(config.bridge.bot_id, "bot-1");
        assert_eq!(config.store.ambiguous_date_order, DateOrder::MonthFirst);
        assert!(config.strategy.command.ends_with("demo-strategy"));
    }
}
