//! Process bridge module
//!
//! Runs one external strategy process and connects it to the broker:
//! readiness handshake, bar forwarding, signal capture and shutdown.
//!
//! The process speaks JSON lines. Each stdin line is an envelope
//! `{"topic": "...", "payload": {...}}` carrying market data, position
//! snapshots, historical responses or the shutdown notice. Each stdout line
//! that parses as an envelope is published on the broker; anything else is a
//! log line and is scanned for the textual ready marker.

mod controller;
mod process;
mod types;

pub use controller::StrategyBridge;
pub use types::{
    BridgeState, BridgeStats, MarketDataMessage, PositionSnapshot, PositionUpdate, ReadyMessage,
    ShutdownNotice, Signal, SignalAction,
};

use crate::bootstrap::BootstrapError;
use crate::broker::BrokerError;
use std::time::Duration;
use thiserror::Error;

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The process could not be spawned or died before becoming ready
    #[error("strategy process failed to start: {0}")]
    ProcessStartupFailure(String),

    /// Broker unreachable during setup
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("bootstrap service failed to start: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// No ready marker within the window, with `ready_timeout_fatal` set
    #[error("strategy not ready after {0:?}")]
    ReadyTimeout(Duration),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: BridgeState,
    },
}
