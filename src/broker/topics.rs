//! Topic names shared by the bootstrap service, the bridge and strategies

/// Strategy -> bootstrap service
pub const HISTORICAL_REQUEST: &str = "historical-data:request";
/// Bootstrap service -> strategy
pub const HISTORICAL_RESPONSE: &str = "historical-data:response";
/// Bridge -> strategy position snapshots
pub const POSITION_RESPONSE: &str = "position:response";
/// Strategy -> bridge readiness handshake
pub const STRATEGY_READY: &str = "strategy-ready";

/// Bridge -> strategy bars
pub fn market_data_topic(bot_id: &str) -> String {
    format!("market-data:{}", bot_id)
}

/// Strategy -> bridge trade signals
pub fn signal_topic(bot_id: &str) -> String {
    format!("signal:{}", bot_id)
}

/// Bridge -> strategy shutdown notice
pub fn shutdown_topic(bot_id: &str) -> String {
    format!("bridge-shutdown:{}", bot_id)
}
