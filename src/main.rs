use clap::Parser;
use strategy_bridge::cli::{Cli, Commands};
use strategy_bridge::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });
    if let Some(root) = cli.data_dir {
        config.store.root = root;
    }

    // Initialize telemetry
    strategy_bridge::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Symbols(args) => args.execute(&config).await?,
        Commands::Slice(args) => args.execute(&config).await?,
        Commands::Replay(args) => {
            tracing::info!(bot_id = %config.bridge.bot_id, "Starting replay");
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
