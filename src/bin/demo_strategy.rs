//! Reference strategy process speaking the bridge's stdio protocol
//!
//! Requests a warmup history, announces readiness, then emits a signal priced
//! at the bar's close on every Nth bar. Stdout carries protocol envelopes
//! only; logs go to stderr.

use clap::Parser;
use strategy_bridge::bootstrap::{HistoricalDataRequest, HistoricalDataResponse};
use strategy_bridge::bridge::{MarketDataMessage, ReadyMessage, Signal, SignalAction};
use strategy_bridge::broker::{topics, Envelope};
use strategy_bridge::telemetry::{init_logging, LogFormat};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "demo-strategy")]
#[command(about = "Example strategy process for the strategy bridge")]
struct Args {
    /// Bot identifier used in topics and the ready marker
    #[arg(long, default_value = "bot-1")]
    bot_id: String,

    /// Symbol to request warmup history for
    #[arg(long, default_value = "MCL")]
    symbol: String,

    /// Bars of history to request before going ready (0 = none)
    #[arg(long, default_value_t = 0)]
    warmup: usize,

    /// Emit a signal on every Nth bar (0 = never)
    #[arg(long, default_value_t = 3)]
    every: u64,

    /// Announce readiness with a plain text line instead of the handshake
    #[arg(long)]
    text_ready: bool,

    /// Topic the warmup request is sent on
    #[arg(long, default_value = topics::HISTORICAL_REQUEST)]
    request_topic: String,

    /// Topic the warmup response arrives on
    #[arg(long, default_value = topics::HISTORICAL_RESPONSE)]
    response_topic: String,

    /// Exit abruptly after this many bars
    #[arg(long)]
    crash_after: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Strategy {
    args: Args,
    out: Stdout,
    pending_request: Option<String>,
    bars_seen: u64,
    signals_sent: u64,
}

impl Strategy {
    async fn send<T: serde::Serialize>(&mut self, topic: &str, payload: &T) -> anyhow::Result<()> {
        let envelope = Envelope::new(topic, payload)?;
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');
        self.out.write_all(line.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn begin(&mut self) -> anyhow::Result<()> {
        if self.args.warmup == 0 {
            return self.announce().await;
        }

        let request = HistoricalDataRequest {
            request_id: Uuid::new_v4().to_string(),
            symbol: self.args.symbol.clone(),
            bars_back: self.args.warmup,
            timestamp: None,
        };
        tracing::info!(request_id = %request.request_id, bars_back = request.bars_back, "Requesting warmup history");
        self.pending_request = Some(request.request_id.clone());
        let topic = self.args.request_topic.clone();
        self.send(&topic, &request).await
    }

    async fn announce(&mut self) -> anyhow::Result<()> {
        if self.args.text_ready {
            let line = format!("{} ready\n", self.args.bot_id);
            self.out.write_all(line.as_bytes()).await?;
            self.out.flush().await?;
            return Ok(());
        }

        let ready = ReadyMessage {
            bot_id: self.args.bot_id.clone(),
            ready: true,
        };
        self.send(topics::STRATEGY_READY, &ready).await
    }

    /// Returns false once the strategy should exit
    async fn handle(&mut self, envelope: Envelope) -> anyhow::Result<bool> {
        if envelope.topic == topics::shutdown_topic(&self.args.bot_id) {
            tracing::info!("Shutdown notice received");
            return Ok(false);
        }

        if envelope.topic == self.args.response_topic {
            let response: HistoricalDataResponse = envelope.decode()?;
            if self.pending_request.as_deref() != Some(response.request_id.as_str()) {
                return Ok(true);
            }
            self.pending_request = None;
            if response.success {
                tracing::info!(bars = response.bars_returned(), "Warmup history received");
            } else {
                tracing::warn!(error = ?response.error, "Warmup request failed");
            }
            self.announce().await?;
        } else if envelope.topic == topics::market_data_topic(&self.args.bot_id) {
            let bar: MarketDataMessage = envelope.decode()?;
            self.bars_seen += 1;

            if self.args.crash_after.is_some_and(|n| self.bars_seen >= n) {
                tracing::error!(bars = self.bars_seen, "Simulated crash");
                std::process::exit(3);
            }

            if self.args.every > 0 && self.bars_seen % self.args.every == 0 {
                let action = if self.signals_sent % 2 == 0 {
                    SignalAction::Buy
                } else {
                    SignalAction::Sell
                };
                let signal = Signal {
                    action,
                    symbol: bar.symbol.clone(),
                    price: bar.close,
                    quantity: rust_decimal::Decimal::ONE,
                    timestamp: bar.timestamp,
                    reason: format!("bar {}", self.bars_seen),
                };
                self.signals_sent += 1;
                self.send(&topics::signal_topic(&self.args.bot_id), &signal).await?;
            }
        } else if envelope.topic == topics::POSITION_RESPONSE {
            tracing::debug!(payload = %envelope.payload, "Positions updated");
        }

        Ok(true)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, LogFormat::Json)?;

    let mut strategy = Strategy {
        args,
        out: tokio::io::stdout(),
        pending_request: None,
        bars_seen: 0,
        signals_sent: 0,
    };
    strategy.begin().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let envelope = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable input line");
                continue;
            }
        };

        match strategy.handle(envelope).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => tracing::warn!(error = %e, "Failed to handle message"),
        }
    }

    tracing::info!(bars = strategy.bars_seen, signals = strategy.signals_sent, "Strategy exiting");
    Ok(())
}
