//! Integration tests for the bootstrap service over the broker

mod common;

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strategy_bridge::bootstrap::{BootstrapService, HistoricalDataResponse};
use strategy_bridge::broker::{publish_json, topics, Broker, MemoryBroker, Received, Subscription};
use strategy_bridge::config::BootstrapConfig;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    broker: MemoryBroker,
    service: BootstrapService,
    responses: Subscription,
}

async fn harness() -> Harness {
    let dir = common::build_archive();
    let broker = MemoryBroker::new();
    let config = BootstrapConfig {
        poll_interval_ms: 10,
        ..Default::default()
    };
    let service = BootstrapService::new(common::open_store(dir.path()), Arc::new(broker.clone()), config);
    service.start().await.unwrap();
    let responses = broker
        .subscribe(&[topics::HISTORICAL_RESPONSE.to_string()])
        .await
        .unwrap();

    Harness {
        _dir: dir,
        broker,
        service,
        responses,
    }
}

async fn next_response(responses: &mut Subscription) -> HistoricalDataResponse {
    match responses.recv_timeout(Duration::from_secs(5)).await {
        Received::Message(envelope) => envelope.decode().unwrap(),
        other => panic!("no response: {:?}", other),
    }
}

#[tokio::test]
async fn test_scenario_explicit_as_of() {
    let mut h = harness().await;

    publish_json(
        &h.broker,
        topics::HISTORICAL_REQUEST,
        &json!({"requestId": "a-1", "symbol": "MCL", "barsBack": 10, "timestamp": "2023-06-15T12:00:00"}),
    )
    .await
    .unwrap();

    let response = next_response(&mut h.responses).await;
    let as_of = Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap();

    assert!(response.success);
    assert_eq!(response.request_id, "a-1");
    let data = response.data.unwrap();
    assert!(data.bars_returned >= 1 && data.bars_returned <= 10);
    assert_eq!(data.bars_returned, data.bars.len());
    assert_eq!(data.end_datetime, as_of);
    assert!(data.bars.iter().all(|b| b.t <= as_of));
    assert!(data.bars.windows(2).all(|w| w[0].t <= w[1].t));

    h.service.stop().await;
}

#[tokio::test]
async fn test_scenario_missing_symbol() {
    let mut h = harness().await;

    publish_json(
        &h.broker,
        topics::HISTORICAL_REQUEST,
        &json!({"requestId": "b-1", "symbol": "ZZZ", "barsBack": 10}),
    )
    .await
    .unwrap();

    let response = next_response(&mut h.responses).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "b-1");
    assert!(response.data.is_none());
    let error = response.error.unwrap();
    assert!(error.contains("not available"));
    assert!(error.contains("MCL") && error.contains("ES"));

    h.service.stop().await;
}

#[tokio::test]
async fn test_scenario_simulation_clock() {
    let mut h = harness().await;
    let t = Utc.with_ymd_and_hms(2023, 6, 14, 12, 5, 0).unwrap();
    h.service.set_simulation_datetime(t);

    publish_json(
        &h.broker,
        topics::HISTORICAL_REQUEST,
        &json!({"requestId": "d-1", "symbol": "MCL", "barsBack": 3}),
    )
    .await
    .unwrap();

    let response = next_response(&mut h.responses).await;
    let data = response.data.unwrap();
    assert_eq!(data.end_datetime, t);
    assert_eq!(data.bars.last().unwrap().t, t);
    assert_eq!(h.service.resolve_as_of(None), t);

    h.service.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let mut h = harness().await;

    let mut expected = HashMap::new();
    for i in 0..12 {
        let id = format!("c-{}", i);
        let symbol = if i % 3 == 0 { "ZZZ" } else if i % 2 == 0 { "ES" } else { "MCL" };
        expected.insert(id.clone(), (symbol.to_string(), i % 3 != 0));
        publish_json(
            &h.broker,
            topics::HISTORICAL_REQUEST,
            &json!({"requestId": id, "symbol": symbol, "barsBack": 1 + i, "timestamp": "2023-06-15T12:00:00"}),
        )
        .await
        .unwrap();
    }

    for _ in 0..12 {
        let response = next_response(&mut h.responses).await;
        let (symbol, success) = expected.remove(&response.request_id).unwrap();
        assert_eq!(response.success, success);
        if let Some(data) = response.data {
            assert_eq!(data.symbol, symbol);
        }
    }
    assert!(expected.is_empty());

    let stats = h.service.stats();
    assert_eq!(stats.requests_received, 12);
    assert_eq!(stats.responses_sent, 12);
    assert_eq!(stats.errors, 4);
    assert_eq!(stats.requests_by_symbol["ZZZ"], 4);

    h.service.stop().await;
}

#[tokio::test]
async fn test_malformed_request_still_answered() {
    let mut h = harness().await;

    publish_json(
        &h.broker,
        topics::HISTORICAL_REQUEST,
        &json!({"requestId": "m-1", "symbol": "MCL", "barsBack": "lots"}),
    )
    .await
    .unwrap();
    publish_json(&h.broker, topics::HISTORICAL_REQUEST, &json!("garbage"))
        .await
        .unwrap();

    let mut ids = vec![
        next_response(&mut h.responses).await,
        next_response(&mut h.responses).await,
    ]
    .into_iter()
    .map(|r| {
        assert!(!r.success);
        r.request_id
    })
    .collect::<Vec<_>>();
    ids.sort();
    assert_eq!(ids, vec!["m-1".to_string(), "unknown".to_string()]);

    h.service.stop().await;
}

#[tokio::test]
async fn test_stop_unsubscribes() {
    let h = harness().await;
    assert!(h.service.stats().running);
    assert_eq!(h.broker.subscriber_count(topics::HISTORICAL_REQUEST), 1);

    h.service.stop().await;

    assert!(!h.service.stats().running);
    assert_eq!(h.broker.subscriber_count(topics::HISTORICAL_REQUEST), 0);
}

#[tokio::test]
async fn test_listener_exits_when_broker_closes() {
    let h = harness().await;

    h.broker.close();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!h.service.is_running());
    h.service.stop().await;
}
