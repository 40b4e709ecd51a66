//! Slice command implementation

use super::open_store;
use crate::bootstrap::messages::{parse_instant, WireBar};
use crate::config::Config;
use anyhow::Context;
use clap::Args;

#[derive(Args, Debug)]
pub struct SliceArgs {
    /// Archive symbol
    #[arg(long)]
    pub symbol: String,

    /// As-of instant (ISO 8601, read as UTC when no offset is given)
    #[arg(long)]
    pub as_of: String,

    /// Number of trailing bars
    #[arg(long, default_value = "10")]
    pub bars: usize,
}

impl SliceArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let as_of = parse_instant(&self.as_of)
            .with_context(|| format!("invalid --as-of '{}'", self.as_of))?;
        let store = open_store(config)?;

        let bars = store.slice(&self.symbol, as_of, self.bars)?;
        tracing::info!(symbol = %self.symbol, %as_of, returned = bars.len(), "Slice loaded");

        let wire: Vec<WireBar> = bars.iter().map(WireBar::from).collect();
        println!("{}", serde_json::to_string_pretty(&wire)?);
        Ok(())
    }
}
