//! Bridge message and state types

use crate::bootstrap::messages::lenient_instant;
use crate::bootstrap::BootstrapStats;
use crate::store::Bar;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade action requested by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
    #[serde(alias = "close")]
    Close,
    #[serde(alias = "hold")]
    Hold,
}

/// A trade signal emitted by the strategy process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(deserialize_with = "lenient_instant")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// Bar as forwarded on `market-data:<botId>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataMessage {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    pub volume: u64,
    #[serde(deserialize_with = "lenient_instant")]
    pub timestamp: DateTime<Utc>,
}

impl From<&Bar> for MarketDataMessage {
    fn from(bar: &Bar) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            timestamp: bar.timestamp,
        }
    }
}

/// One open position as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(rename = "avgPrice", with = "rust_decimal::serde::float")]
    pub average_price: Decimal,
}

/// Payload of `position:response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub positions: Vec<PositionSnapshot>,
    #[serde(deserialize_with = "lenient_instant")]
    pub timestamp: DateTime<Utc>,
}

/// Structured ready handshake on `strategy-ready`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyMessage {
    pub bot_id: String,
    pub ready: bool,
}

/// Payload of `bridge-shutdown:<botId>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownNotice {
    pub bot_id: String,
    pub reason: String,
    #[serde(deserialize_with = "lenient_instant")]
    pub timestamp: DateTime<Utc>,
}

/// Bridge lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    NotStarted,
    Starting,
    AwaitingReady,
    /// Ready marker observed, no bar processed yet
    Ready,
    /// Processing bars (possibly without a confirmed ready marker)
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::NotStarted => "not_started",
            BridgeState::Starting => "starting",
            BridgeState::AwaitingReady => "awaiting_ready",
            BridgeState::Ready => "ready",
            BridgeState::Running => "running",
            BridgeState::ShuttingDown => "shutting_down",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Bridge counters merged with the embedded bootstrap service's
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStats {
    pub bot_id: String,
    pub state: BridgeState,
    pub ready: bool,
    pub bars_processed: u64,
    /// Signals taken off the broker
    pub signals_received: u64,
    /// Signals handed back from `process_market_data`
    pub signals_returned: u64,
    pub historical_requests_seen: u64,
    pub publish_errors: u64,
    /// Non-envelope lines the process printed
    pub output_lines: u64,
    pub process_id: Option<u32>,
    pub process_exit_code: Option<i32>,
    /// The process exited without being asked to
    pub crashed: bool,
    pub bootstrap: BootstrapStats,
}
