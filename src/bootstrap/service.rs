//! Historical data request listener

use super::messages::{HistoricalDataRequest, HistoricalDataResponse, RequestTimestamp};
use super::{BootstrapError, SimulationClock};
use crate::broker::{Broker, Envelope, Received, Subscription};
use crate::config::BootstrapConfig;
use crate::store::{BarStore, StoreError};
use crate::telemetry::{self, CounterMetric, LatencyMetric};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Request-handling statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapStats {
    pub requests_received: u64,
    pub responses_sent: u64,
    pub errors: u64,
    pub requests_by_symbol: BTreeMap<String, u64>,
    pub running: bool,
}

/// Shared by the listener loop and every in-flight request
struct RequestHandler {
    store: Arc<BarStore>,
    broker: Arc<dyn Broker>,
    clock: SimulationClock,
    response_topic: String,
    max_bars_back: usize,
    stats: RwLock<BootstrapStats>,
}

impl RequestHandler {
    fn resolve_as_of(&self, timestamp: Option<&RequestTimestamp>) -> DateTime<Utc> {
        if let Some(raw) = timestamp {
            match raw.resolve() {
                Some(instant) => return instant,
                None => tracing::warn!(timestamp = ?raw, "Unparseable request timestamp, ignoring"),
            }
        }
        if let Some(now) = self.clock.now() {
            return now;
        }
        // Nothing better known: yesterday is guaranteed to be in the past
        Utc::now() - Duration::days(1)
    }

    async fn build_response(&self, request: HistoricalDataRequest) -> HistoricalDataResponse {
        {
            let mut stats = self.stats.write();
            stats.requests_received += 1;
            *stats
                .requests_by_symbol
                .entry(request.symbol.clone())
                .or_insert(0) += 1;
        }
        telemetry::increment(CounterMetric::BootstrapRequests, 1);

        let as_of = self.resolve_as_of(request.timestamp.as_ref());
        let bars_back = request.bars_back.min(self.max_bars_back);
        if bars_back < request.bars_back {
            tracing::debug!(
                request_id = %request.request_id,
                requested = request.bars_back,
                bars_back,
                "Clamped barsBack"
            );
        }

        let store = self.store.clone();
        let symbol = request.symbol.clone();
        let sliced =
            tokio::task::spawn_blocking(move || store.slice(&symbol, as_of, bars_back)).await;

        match sliced {
            Ok(Ok(bars)) => {
                tracing::info!(
                    request_id = %request.request_id,
                    symbol = %request.symbol,
                    %as_of,
                    returned = bars.len(),
                    "Serving historical bars"
                );
                HistoricalDataResponse::success(
                    request.request_id,
                    request.symbol,
                    &bars,
                    bars_back,
                    as_of,
                )
            }
            Ok(Err(e @ StoreError::SymbolNotAvailable { .. })) => {
                self.record_error();
                tracing::warn!(request_id = %request.request_id, error = %e, "Symbol not available");
                HistoricalDataResponse::failure(request.request_id, e.to_string())
            }
            Ok(Err(e)) => {
                self.record_error();
                tracing::error!(request_id = %request.request_id, error = %e, "Failed to load bars");
                HistoricalDataResponse::failure(request.request_id, format!("failed to load bars: {}", e))
            }
            Err(e) => {
                self.record_error();
                tracing::error!(request_id = %request.request_id, error = %e, "Slice task failed");
                HistoricalDataResponse::failure(request.request_id, "internal error while loading bars")
            }
        }
    }

    /// Answer a raw request payload; never leaves the requester without a response
    async fn respond(&self, payload: serde_json::Value) -> HistoricalDataResponse {
        let response = match serde_json::from_value::<HistoricalDataRequest>(payload.clone()) {
            Ok(request) => self.build_response(request).await,
            Err(e) => {
                let request_id = payload
                    .get("requestId")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown");
                {
                    let mut stats = self.stats.write();
                    stats.requests_received += 1;
                }
                self.record_error();
                tracing::warn!(request_id, error = %e, "Malformed historical data request");
                HistoricalDataResponse::failure(request_id, format!("malformed request: {}", e))
            }
        };

        self.publish(&response).await;
        response
    }

    async fn publish(&self, response: &HistoricalDataResponse) {
        let result = match Envelope::new(self.response_topic.as_str(), response) {
            Ok(envelope) => self.broker.publish(envelope).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => self.stats.write().responses_sent += 1,
            Err(e) => {
                self.record_error();
                telemetry::increment(CounterMetric::PublishErrors, 1);
                tracing::warn!(request_id = %response.request_id, error = %e, "Failed to publish response");
            }
        }
    }

    fn record_error(&self) {
        self.stats.write().errors += 1;
        telemetry::increment(CounterMetric::BootstrapErrors, 1);
    }
}

/// Answers "N bars as of T" requests from the broker with archive data
///
/// Lifecycle: `Stopped -> Listening -> Stopped`. Requests are handled
/// concurrently; responses for different request ids may be published in any
/// order.
pub struct BootstrapService {
    handler: Arc<RequestHandler>,
    config: BootstrapConfig,
    running: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrapService {
    /// Create a stopped service with its own simulation clock
    pub fn new(store: Arc<BarStore>, broker: Arc<dyn Broker>, config: BootstrapConfig) -> Self {
        Self::with_clock(store, broker, config, SimulationClock::new())
    }

    /// Create a stopped service reading the given clock
    pub fn with_clock(
        store: Arc<BarStore>,
        broker: Arc<dyn Broker>,
        config: BootstrapConfig,
        clock: SimulationClock,
    ) -> Self {
        let handler = RequestHandler {
            store,
            broker,
            clock,
            response_topic: config.response_topic.clone(),
            max_bars_back: config.max_bars_back,
            stats: RwLock::new(BootstrapStats::default()),
        };

        Self {
            handler: Arc::new(handler),
            config,
            running: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        }
    }

    /// Subscribe to the request topic and spawn the listener
    ///
    /// Calling this while already listening logs a warning and does nothing.
    pub async fn start(&self) -> Result<(), BootstrapError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Bootstrap service already listening");
            return Ok(());
        }

        let subscription = match self
            .handler
            .broker
            .subscribe(&[self.config.request_topic.clone()])
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let handle = tokio::spawn(run_listener(
            self.handler.clone(),
            subscription,
            self.running.clone(),
            self.config.poll_interval(),
        ));
        *self.listener.lock() = Some(handle);

        tracing::info!(
            request_topic = %self.config.request_topic,
            response_topic = %self.config.response_topic,
            "Bootstrap service listening"
        );
        Ok(())
    }

    /// Stop listening and join the listener within the configured timeout
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handle = self.listener.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(self.config.stop_timeout(), &mut handle).await {
            Ok(_) => tracing::info!("Bootstrap service stopped"),
            Err(_) => {
                tracing::warn!("Bootstrap listener did not stop in time, aborting it");
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Answer one request and publish the response
    pub async fn handle_request(&self, request: HistoricalDataRequest) -> HistoricalDataResponse {
        let response = self.handler.build_response(request).await;
        self.handler.publish(&response).await;
        response
    }

    /// Instant a request would be served at
    pub fn resolve_as_of(&self, timestamp: Option<&RequestTimestamp>) -> DateTime<Utc> {
        self.handler.resolve_as_of(timestamp)
    }

    /// Overwrite the simulation clock; applies to all later requests
    pub fn set_simulation_datetime(&self, instant: DateTime<Utc>) {
        self.handler.clock.set(instant);
        tracing::debug!(%instant, "Simulation clock set");
    }

    /// Handle to the service's simulation clock
    pub fn clock(&self) -> SimulationClock {
        self.handler.clock.clone()
    }

    pub fn stats(&self) -> BootstrapStats {
        let mut stats = self.handler.stats.read().clone();
        stats.running = self.is_running();
        stats
    }
}

impl Drop for BootstrapService {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

/// Receive with a short timeout so the stop flag is seen promptly
async fn run_listener(
    handler: Arc<RequestHandler>,
    mut subscription: Subscription,
    running: Arc<AtomicBool>,
    poll_interval: std::time::Duration,
) {
    while running.load(Ordering::SeqCst) {
        match subscription.recv_timeout(poll_interval).await {
            Received::Message(envelope) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    handler.respond(envelope.payload).await;
                    telemetry::record_latency(LatencyMetric::BootstrapRequest, started.elapsed());
                });
            }
            Received::Timeout => {}
            Received::Closed => {
                tracing::warn!("Request subscription closed, bootstrap listener exiting");
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    tracing::debug!("Bootstrap listener loop ended");
}
