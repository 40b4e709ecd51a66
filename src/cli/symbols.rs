//! Symbols command implementation

use super::open_store;
use crate::config::Config;
use clap::Args;

#[derive(Args, Debug)]
pub struct SymbolsArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl SymbolsArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = open_store(config)?;

        let rows: Vec<(String, Option<String>, Option<String>)> = store
            .list_symbols()
            .into_iter()
            .map(|symbol| {
                let range = store.date_range(&symbol);
                (
                    symbol,
                    range.map(|(start, _)| start.to_string()),
                    range.map(|(_, end)| end.to_string()),
                )
            })
            .collect();

        if self.json {
            let value: Vec<serde_json::Value> = rows
                .iter()
                .map(|(symbol, start, end)| {
                    serde_json::json!({"symbol": symbol, "start": start, "end": end})
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        if rows.is_empty() {
            println!("No symbols under {}", store.root().display());
            return Ok(());
        }

        println!("{:<12} {:<12} {:<12}", "SYMBOL", "FIRST", "LAST");
        for (symbol, start, end) in rows {
            println!(
                "{:<12} {:<12} {:<12}",
                symbol,
                start.unwrap_or_else(|| "-".to_string()),
                end.unwrap_or_else(|| "-".to_string())
            );
        }
        Ok(())
    }
}
