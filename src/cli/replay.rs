//! Replay command implementation

use super::open_store;
use crate::bootstrap::messages::parse_instant;
use crate::bridge::{BridgeState, StrategyBridge};
use crate::broker::MemoryBroker;
use crate::config::Config;
use anyhow::Context;
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Archive symbol to replay
    #[arg(long)]
    pub symbol: String,

    /// First bar instant (ISO 8601)
    #[arg(long)]
    pub start: String,

    /// Last bar instant (ISO 8601)
    #[arg(long)]
    pub end: String,

    /// Stop after this many bars
    #[arg(long)]
    pub limit: Option<usize>,

    /// Strategy executable, overriding `[strategy].command`
    #[arg(long)]
    pub strategy: Option<String>,

    /// Arguments for the strategy executable (after `--`)
    #[arg(last = true)]
    pub strategy_args: Vec<String>,
}

impl ReplayArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let start = parse_instant(&self.start)
            .with_context(|| format!("invalid --start '{}'", self.start))?;
        let end =
            parse_instant(&self.end).with_context(|| format!("invalid --end '{}'", self.end))?;
        anyhow::ensure!(start <= end, "--start must not be after --end");

        let mut strategy = config.strategy.clone();
        if let Some(command) = &self.strategy {
            strategy.command = command.clone();
            strategy.args = self.strategy_args.clone();
        }

        let store = Arc::new(open_store(config)?);
        let loader = store.clone();
        let symbol = self.symbol.clone();
        let mut bars =
            tokio::task::spawn_blocking(move || loader.bars_between(&symbol, start, end)).await??;
        if let Some(limit) = self.limit {
            bars.truncate(limit);
        }
        tracing::info!(symbol = %self.symbol, bars = bars.len(), %start, %end, "Replay loaded");

        let broker = Arc::new(MemoryBroker::new());
        let mut bridge = StrategyBridge::new(
            config.bridge.clone(),
            broker,
            store,
            config.bootstrap.clone(),
        );
        // Warmup history must end where the replay begins
        bridge.bootstrap().set_simulation_datetime(start);

        let ready = bridge.start(&strategy).await?;
        if !ready {
            tracing::warn!(bot_id = %bridge.bot_id(), "Replaying without a confirmed ready marker");
        }

        let mut signals = 0usize;
        for bar in &bars {
            if let Some(signal) = bridge.process_market_data(bar).await {
                signals += 1;
                println!("{}", serde_json::to_string(&signal)?);
            }
            if bridge.state() == BridgeState::Stopped {
                tracing::error!(bot_id = %bridge.bot_id(), "Strategy process is gone, ending replay");
                break;
            }
        }

        bridge.shutdown().await;

        let stats = bridge.get_statistics();
        tracing::info!(signals, bars = stats.bars_processed, "Replay finished");
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }
}
