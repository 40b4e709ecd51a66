//! Bootstrap module
//!
//! Serves "N bars as of T" historical requests arriving on the broker, so a
//! strategy can warm up its indicators before the replay starts. The as-of
//! instant comes from the request, else from the shared [`SimulationClock`].

mod clock;
pub mod messages;
mod service;

pub use clock::SimulationClock;
pub use messages::{
    HistoricalData, HistoricalDataRequest, HistoricalDataResponse, RequestTimestamp, WireBar,
};
pub use service::{BootstrapService, BootstrapStats};

use crate::broker::BrokerError;
use thiserror::Error;

/// Bootstrap service errors
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Could not subscribe to the request topic
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}
