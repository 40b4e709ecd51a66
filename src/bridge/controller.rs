//! Strategy process bridge

use super::process::{self, OutputReader, ReadyMatcher};
use super::types::{
    BridgeState, BridgeStats, MarketDataMessage, PositionSnapshot, PositionUpdate, ReadyMessage,
    ShutdownNotice, Signal,
};
use super::BridgeError;
use crate::bootstrap::BootstrapService;
use crate::broker::{publish_json, topics, Broker, Envelope, Received, Subscription};
use crate::config::{BootstrapConfig, BridgeConfig, StrategyConfig};
use crate::store::{Bar, BarStore};
use crate::telemetry::{self, CounterMetric, GaugeMetric, LatencyMetric};
use chrono::Utc;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Flags and counters written by the background tasks
#[derive(Debug, Default)]
pub(super) struct SharedState {
    ready: AtomicBool,
    pub(super) bars_processed: AtomicU64,
    pub(super) signals_received: AtomicU64,
    pub(super) signals_returned: AtomicU64,
    pub(super) historical_requests_seen: AtomicU64,
    pub(super) publish_errors: AtomicU64,
    pub(super) output_lines: AtomicU64,
}

impl SharedState {
    pub(super) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(super) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        telemetry::set_gauge(GaugeMetric::StrategyReady, 1.0);
    }

    pub(super) fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
        telemetry::increment(CounterMetric::PublishErrors, 1);
    }
}

/// Owns one external strategy process and its broker plumbing
///
/// The orchestrator drives it bar by bar:
///
/// ```ignore
/// let mut bridge = StrategyBridge::new(config.bridge, broker, store, config.bootstrap);
/// bridge.start(&config.strategy).await?;
/// for bar in bars {
///     if let Some(signal) = bridge.process_market_data(&bar).await {
///         // act on the signal
///     }
/// }
/// bridge.shutdown().await;
/// ```
pub struct StrategyBridge {
    config: BridgeConfig,
    broker: Arc<dyn Broker>,
    bootstrap: BootstrapService,
    request_topic: String,
    response_topic: String,
    state: BridgeState,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
    child: Option<Child>,
    process_id: Option<u32>,
    exit_code: Option<i32>,
    crashed: bool,
    signals: Option<mpsc::Receiver<Signal>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl StrategyBridge {
    /// Create a bridge with an embedded bootstrap service sharing `broker`
    pub fn new(
        config: BridgeConfig,
        broker: Arc<dyn Broker>,
        store: Arc<BarStore>,
        bootstrap_config: BootstrapConfig,
    ) -> Self {
        let request_topic = bootstrap_config.request_topic.clone();
        let response_topic = bootstrap_config.response_topic.clone();
        let bootstrap = BootstrapService::new(store, broker.clone(), bootstrap_config);

        Self {
            config,
            broker,
            bootstrap,
            request_topic,
            response_topic,
            state: BridgeState::NotStarted,
            shared: Arc::new(SharedState::default()),
            running: Arc::new(AtomicBool::new(false)),
            child: None,
            process_id: None,
            exit_code: None,
            crashed: false,
            signals: None,
            tasks: Vec::new(),
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.config.bot_id
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Whether a ready marker has been observed
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// The embedded bootstrap service
    pub fn bootstrap(&self) -> &BootstrapService {
        &self.bootstrap
    }

    /// Spawn the strategy and wait for its ready marker
    ///
    /// Returns `Ok(true)` when ready was observed in time. On timeout the
    /// bridge stays usable and returns `Ok(false)`, unless
    /// `ready_timeout_fatal` is set.
    pub async fn start(&mut self, strategy: &StrategyConfig) -> Result<bool, BridgeError> {
        if self.state != BridgeState::NotStarted {
            return Err(BridgeError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        if self.config.bot_id.trim().is_empty() {
            tracing::error!("Strategy bridge needs a bot id");
            return Err(BridgeError::InvalidState {
                action: "start without a bot id",
                state: self.state,
            });
        }

        self.state = BridgeState::Starting;
        tracing::info!(
            bot_id = %self.config.bot_id,
            command = %strategy.command,
            "Starting strategy bridge"
        );

        if let Err(e) = self.launch(strategy).await {
            tracing::error!(bot_id = %self.config.bot_id, error = %e, "Strategy bridge failed to start");
            self.teardown().await;
            return Err(e);
        }

        self.state = BridgeState::AwaitingReady;
        self.await_ready().await
    }

    /// Acquire the broker subscriptions and the process, then spawn the tasks
    async fn launch(&mut self, strategy: &StrategyConfig) -> Result<(), BridgeError> {
        let bot_id = self.config.bot_id.clone();

        self.bootstrap.start().await?;

        let listener = self
            .broker
            .subscribe(&[
                topics::signal_topic(&bot_id),
                topics::STRATEGY_READY.to_string(),
                self.request_topic.clone(),
            ])
            .await?;

        let relay = if self.config.relay_stdio {
            Some(
                self.broker
                    .subscribe(&[
                        topics::market_data_topic(&bot_id),
                        topics::POSITION_RESPONSE.to_string(),
                        self.response_topic.clone(),
                        topics::shutdown_topic(&bot_id),
                    ])
                    .await?,
            )
        } else {
            None
        };

        let mut child = process::spawn(strategy, self.config.relay_stdio)?;
        self.process_id = child.id();
        tracing::info!(bot_id = %bot_id, pid = ?self.process_id, "Strategy process spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();
        self.child = Some(child);

        self.running.store(true, Ordering::SeqCst);

        let (signal_tx, signal_rx) = mpsc::channel(self.config.signal_queue_capacity.max(1));
        self.signals = Some(signal_rx);

        self.tasks.push((
            "broker-listener",
            tokio::spawn(run_listener(
                bot_id.clone(),
                self.request_topic.clone(),
                listener,
                signal_tx,
                self.shared.clone(),
                self.running.clone(),
                self.config.poll_interval(),
            )),
        ));

        let reader = OutputReader {
            bot_id: bot_id.clone(),
            broker: self.broker.clone(),
            shared: self.shared.clone(),
            matcher: ReadyMatcher::new(&bot_id, &self.config.ready_patterns),
            relay_stdio: self.config.relay_stdio,
        };
        self.tasks
            .push(("output-reader", tokio::spawn(reader.run(stdout, stderr))));

        if let (Some(stdin), Some(subscription)) = (stdin, relay) {
            self.tasks.push((
                "stdin-relay",
                tokio::spawn(process::relay_stdin(
                    stdin,
                    subscription,
                    self.running.clone(),
                    self.config.poll_interval(),
                    topics::shutdown_topic(&bot_id),
                )),
            ));
        }

        Ok(())
    }

    /// Poll the ready flag and the process until ready, exit or timeout
    async fn await_ready(&mut self) -> Result<bool, BridgeError> {
        let timeout = self.config.ready_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            if self.shared.is_ready() {
                self.state = BridgeState::Ready;
                tracing::info!(bot_id = %self.config.bot_id, "Strategy ready");
                return Ok(true);
            }

            if !self.is_alive() {
                // A ready line may still be in flight when the process exits
                self.drain_output().await;
                if !self.shared.is_ready() {
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                if self.shared.is_ready() {
                    self.state = BridgeState::Ready;
                    tracing::warn!(
                        bot_id = %self.config.bot_id,
                        exit_code = ?self.exit_code,
                        "Strategy reported ready and exited"
                    );
                    return Ok(true);
                }
                let reason = format!(
                    "strategy exited before becoming ready (exit code {:?})",
                    self.exit_code
                );
                self.teardown().await;
                return Err(BridgeError::ProcessStartupFailure(reason));
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
        }

        if self.config.ready_timeout_fatal {
            tracing::error!(bot_id = %self.config.bot_id, ?timeout, "No ready marker, aborting");
            self.shutdown().await;
            return Err(BridgeError::ReadyTimeout(timeout));
        }

        tracing::warn!(
            bot_id = %self.config.bot_id,
            ?timeout,
            "No ready marker before timeout, continuing unconfirmed"
        );
        self.state = BridgeState::Running;
        Ok(false)
    }

    /// Give the output reader a bounded chance to consume what an exited
    /// process already wrote
    async fn drain_output(&mut self) {
        let Some(index) = self.tasks.iter().position(|(name, _)| *name == "output-reader") else {
            return;
        };
        let (name, mut handle) = self.tasks.remove(index);
        if tokio::time::timeout(self.config.join_timeout(), &mut handle).await.is_err() {
            // Output still held open, e.g. by a grandchild
            self.tasks.push((name, handle));
        }
    }

    /// Forward one bar and wait briefly for a signal
    ///
    /// `None` is the common outcome. Never blocks past `signal_wait_ms`.
    pub async fn process_market_data(&mut self, bar: &Bar) -> Option<Signal> {
        if !matches!(self.state, BridgeState::Ready | BridgeState::Running) {
            tracing::debug!(bot_id = %self.config.bot_id, state = %self.state, "Bridge not running, bar dropped");
            return None;
        }

        if !self.is_alive() {
            self.shutdown().await;
            return None;
        }
        self.state = BridgeState::Running;

        if self.config.advance_clock {
            self.bootstrap.set_simulation_datetime(bar.timestamp);
        }

        let topic = topics::market_data_topic(&self.config.bot_id);
        if let Err(e) = publish_json(self.broker.as_ref(), &topic, &MarketDataMessage::from(bar)).await {
            self.shared.record_publish_error();
            tracing::warn!(bot_id = %self.config.bot_id, symbol = %bar.symbol, error = %e, "Failed to publish bar");
        }
        self.shared.bars_processed.fetch_add(1, Ordering::Relaxed);
        telemetry::increment(CounterMetric::BarsProcessed, 1);

        let signals = self.signals.as_mut()?;
        let started = Instant::now();
        let signal = match tokio::time::timeout(self.config.signal_wait(), signals.recv()).await {
            Ok(Some(signal)) => Some(signal),
            Ok(None) | Err(_) => None,
        };
        telemetry::record_latency(LatencyMetric::SignalWait, started.elapsed());

        if let Some(signal) = &signal {
            self.shared.signals_returned.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                bot_id = %self.config.bot_id,
                action = ?signal.action,
                symbol = %signal.symbol,
                price = %signal.price,
                "Signal returned"
            );
        }
        signal
    }

    /// Publish a position snapshot to the strategy; failures are only logged
    pub async fn update_positions(&self, positions: &[PositionSnapshot]) {
        let update = PositionUpdate {
            positions: positions.to_vec(),
            timestamp: self.bootstrap.clock().now().unwrap_or_else(Utc::now),
        };

        if let Err(e) = publish_json(self.broker.as_ref(), topics::POSITION_RESPONSE, &update).await {
            self.shared.record_publish_error();
            tracing::warn!(bot_id = %self.config.bot_id, error = %e, "Failed to publish positions");
        }
    }

    /// Bridge counters merged with the bootstrap service's
    pub fn get_statistics(&self) -> BridgeStats {
        BridgeStats {
            bot_id: self.config.bot_id.clone(),
            state: self.state,
            ready: self.shared.is_ready(),
            bars_processed: self.shared.bars_processed.load(Ordering::Relaxed),
            signals_received: self.shared.signals_received.load(Ordering::Relaxed),
            signals_returned: self.shared.signals_returned.load(Ordering::Relaxed),
            historical_requests_seen: self.shared.historical_requests_seen.load(Ordering::Relaxed),
            publish_errors: self.shared.publish_errors.load(Ordering::Relaxed),
            output_lines: self.shared.output_lines.load(Ordering::Relaxed),
            process_id: self.process_id,
            process_exit_code: self.exit_code,
            crashed: self.crashed,
            bootstrap: self.bootstrap.stats(),
        }
    }

    /// Liveness check; an exit is recorded (and flagged as a crash unless
    /// shutdown was requested). The process is never restarted.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.record_exit(status);
                false
            }
            Err(e) => {
                tracing::warn!(bot_id = %self.config.bot_id, error = %e, "Liveness check failed");
                false
            }
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        if self.exit_code.is_none() && !self.crashed {
            self.exit_code = status.code();
            if !matches!(self.state, BridgeState::ShuttingDown | BridgeState::Stopped) {
                self.crashed = true;
                tracing::error!(bot_id = %self.config.bot_id, %status, "Strategy process exited unexpectedly");
            } else {
                tracing::info!(bot_id = %self.config.bot_id, %status, "Strategy process exited");
            }
        }
    }

    /// Notify the strategy, stop the process and join every task
    ///
    /// Safe to call repeatedly and before `start` completed.
    pub async fn shutdown(&mut self) {
        if self.state == BridgeState::Stopped {
            tracing::debug!(bot_id = %self.config.bot_id, "Bridge already stopped");
            return;
        }

        let started = self.state != BridgeState::NotStarted;
        self.state = BridgeState::ShuttingDown;
        tracing::info!(bot_id = %self.config.bot_id, "Shutting down strategy bridge");

        if started && self.child.is_some() {
            let notice = ShutdownNotice {
                bot_id: self.config.bot_id.clone(),
                reason: "bridge shutdown".to_string(),
                timestamp: Utc::now(),
            };
            let topic = topics::shutdown_topic(&self.config.bot_id);
            if let Err(e) = publish_json(self.broker.as_ref(), &topic, &notice).await {
                tracing::warn!(bot_id = %self.config.bot_id, error = %e, "Failed to publish shutdown notice");
            }
        }

        self.teardown().await;
        tracing::info!(bot_id = %self.config.bot_id, "Strategy bridge stopped");
    }

    /// Release the process, the tasks and the bootstrap service
    async fn teardown(&mut self) {
        // Listener enqueues nothing once the receiver is gone
        self.signals = None;

        if let Some(mut child) = self.child.take() {
            self.stop_process(&mut child).await;
        }

        self.running.store(false, Ordering::SeqCst);
        let join_timeout = self.config.join_timeout();
        for (name, mut handle) in self.tasks.drain(..) {
            if tokio::time::timeout(join_timeout, &mut handle).await.is_err() {
                tracing::warn!(task = name, "Bridge task did not stop in time, aborting it");
                handle.abort();
            }
        }

        self.bootstrap.stop().await;
        telemetry::set_gauge(GaugeMetric::StrategyReady, 0.0);
        self.state = BridgeState::Stopped;
    }

    async fn stop_process(&mut self, child: &mut Child) {
        if let Ok(Some(status)) = child.try_wait() {
            self.record_exit(status);
            return;
        }

        match tokio::time::timeout(self.config.shutdown_grace(), child.wait()).await {
            Ok(Ok(status)) => self.record_exit(status),
            Ok(Err(e)) => {
                tracing::warn!(bot_id = %self.config.bot_id, error = %e, "Failed to wait for strategy process");
            }
            Err(_) => {
                tracing::warn!(
                    bot_id = %self.config.bot_id,
                    grace = ?self.config.shutdown_grace(),
                    "Strategy process did not exit in time, killing it"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(bot_id = %self.config.bot_id, error = %e, "Failed to kill strategy process");
                }
                if let Ok(Some(status)) = child.try_wait() {
                    self.record_exit(status);
                }
            }
        }
    }
}

impl Drop for StrategyBridge {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for (_, handle) in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

/// Route strategy messages from the broker into the bridge
async fn run_listener(
    bot_id: String,
    request_topic: String,
    mut subscription: Subscription,
    signals: mpsc::Sender<Signal>,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let signal_topic = topics::signal_topic(&bot_id);

    while running.load(Ordering::SeqCst) {
        let envelope = match subscription.recv_timeout(poll_interval).await {
            Received::Message(envelope) => envelope,
            Received::Timeout => continue,
            Received::Closed => {
                tracing::warn!(bot_id = %bot_id, "Bridge subscription closed, listener exiting");
                break;
            }
        };

        if envelope.topic == signal_topic {
            handle_signal(&bot_id, &envelope, &signals, &shared);
        } else if envelope.topic == topics::STRATEGY_READY {
            match envelope.decode::<ReadyMessage>() {
                Ok(ready) if ready.bot_id == bot_id && ready.ready => {
                    if !shared.is_ready() {
                        tracing::info!(bot_id = %bot_id, "Ready handshake received");
                        shared.mark_ready();
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(bot_id = %bot_id, error = %e, "Malformed ready message"),
            }
        } else if envelope.topic == request_topic {
            shared.historical_requests_seen.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn handle_signal(
    bot_id: &str,
    envelope: &Envelope,
    signals: &mpsc::Sender<Signal>,
    shared: &SharedState,
) {
    let signal = match envelope.decode::<Signal>() {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!(bot_id, error = %e, "Malformed signal, dropping");
            return;
        }
    };

    shared.signals_received.fetch_add(1, Ordering::Relaxed);
    telemetry::increment(CounterMetric::SignalsReceived, 1);
    tracing::debug!(bot_id, action = ?signal.action, symbol = %signal.symbol, "Signal received");

    match signals.try_send(signal) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(bot_id, "Signal queue full, dropping signal");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(bot_id, "Bridge shutting down, signal discarded");
        }
    }
}
