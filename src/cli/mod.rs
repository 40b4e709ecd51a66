//! CLI interface for strategy-bridge
//!
//! Provides subcommands for:
//! - `symbols`: List archive symbols and their date ranges
//! - `slice`: Print the bars a historical request would receive
//! - `replay`: Drive a strategy process through archive bars
//! - `config`: Show the effective configuration

mod replay;
mod slice;
mod symbols;

pub use replay::ReplayArgs;
pub use slice::SliceArgs;
pub use symbols::SymbolsArgs;

use crate::config::Config;
use crate::store::BarStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "strategy-bridge")]
#[command(about = "Backtest bridge between a bar archive and an external strategy process")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Override the archive root from the configuration
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List archive symbols
    Symbols(SymbolsArgs),
    /// Print a historical slice as JSON
    Slice(SliceArgs),
    /// Replay archive bars through a strategy process
    Replay(ReplayArgs),
    /// Show configuration
    Config,
}

/// Open the configured archive
pub(crate) fn open_store(config: &Config) -> anyhow::Result<BarStore> {
    let store = BarStore::open(&config.store)?;
    tracing::debug!(root = %store.root().display(), "Archive opened");
    Ok(store)
}
