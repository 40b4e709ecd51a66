//! strategy-bridge: backtest bridge to external strategy processes
//!
//! This library provides the core components for:
//! - Symbol-exact bar retrieval from a partitioned CSV archive
//! - Historical bootstrap requests answered over a pub/sub broker
//! - Lifecycle of an external strategy process: spawn, ready handshake,
//!   bar forwarding, signal capture and shutdown
//! - Structured logging and Prometheus metrics

pub mod bootstrap;
pub mod bridge;
pub mod broker;
pub mod cli;
pub mod config;
pub mod store;
pub mod telemetry;
