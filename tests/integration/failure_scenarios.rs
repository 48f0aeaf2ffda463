//! Failure and recovery scenarios

use crate::helpers::*;
use pretty_assertions::assert_eq;
use status_sentry::{
    Event, StatusUpdate,
    actors::{
        bus::{BusConfig, BusPublisherActor, PubSubBus},
        dispatch::{DispatchConfig, DispatchHandle},
        scheduler::SchedulerHandle,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn status_event(name: &str, message: &str) -> Event {
    let target = create_test_target(name, &format!("webhook:/{name}"), vec![]);
    Event::status(StatusUpdate::for_target(
        &target,
        message,
        message,
        chrono::Utc::now(),
    ))
}

// ============================================================================
// Sink failures
// ============================================================================

#[tokio::test]
async fn test_sink_outage_then_recovery() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&sink)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;

    let dispatch = spawn_dispatch(&sink, Duration::from_millis(200));
    let event = status_event("Acme", "Partial outage");
    let id = event.id.to_string();

    dispatch.funnel().send(event).await.unwrap();
    wait_for_requests(&sink, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.failed_attempts, 1);
    assert_eq!(stats.pending, 1);

    // Not eligible before the backoff elapses
    assert!(!dispatch.redrive_now().await.unwrap());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(dispatch.redrive_now().await.unwrap());

    let requests = wait_for_requests(&sink, 2).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(body_json(&requests[0])["event_id"], id);
    assert_eq!(body_json(&requests[1])["event_id"], id, "retries reuse the event id");

    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_events_keep_flowing_while_sink_rejects() {
    let sink = create_sink(500).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));

    for n in 0..3 {
        dispatch
            .funnel()
            .send(status_event("Acme", &format!("update {n}")))
            .await
            .unwrap();
    }

    wait_for_requests(&sink, 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.pending, 3, "every failed event waits for its own retry");
}

#[tokio::test]
async fn test_unreachable_sink_does_not_stop_dispatch() {
    let config = DispatchConfig {
        scan_interval: Duration::from_secs(3600),
        ..DispatchConfig::new(Some("http://127.0.0.1:1/events".to_string()))
    };
    let dispatch = DispatchHandle::spawn(
        config,
        reqwest::Client::new(),
        None,
        CancellationToken::new(),
    );

    dispatch.funnel().send(status_event("Acme", "down")).await.unwrap();
    dispatch.funnel().send(status_event("Acme", "still down")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.pending, 2);
}

// ============================================================================
// Probe failures
// ============================================================================

#[tokio::test]
async fn test_failing_page_still_reports_and_other_targets_continue() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&site)
        .await;

    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));

    let _scheduler = SchedulerHandle::spawn_with_interval(
        vec![
            create_test_target("Healthy", "webhook:/h", vec![format!("{}/healthy", site.uri())]),
            create_test_target("Broken", "webhook:/b", vec![format!("{}/broken", site.uri())]),
            create_test_target(
                "Offline",
                "webhook:/o",
                vec!["http://127.0.0.1:1/".to_string()],
            ),
        ],
        spawn_pool(),
        dispatch.funnel(),
        CancellationToken::new(),
        Duration::from_secs(3600),
    );

    let requests = wait_for_requests(&sink, 3).await;
    assert_eq!(requests.len(), 3);

    let mut codes: Vec<(String, u64)> = requests
        .iter()
        .map(body_json)
        .map(|body| {
            (
                body["service_name"].as_str().unwrap().to_string(),
                body["ping_response_code"].as_u64().unwrap(),
            )
        })
        .collect();
    codes.sort();

    assert_eq!(
        codes,
        vec![
            ("Broken".to_string(), 500),
            ("Healthy".to_string(), 200),
            ("Offline".to_string(), 0),
        ]
    );
}

// ============================================================================
// Event bus
// ============================================================================

fn bus_config(endpoint: &str) -> BusConfig {
    BusConfig {
        project_id: "sentry-test".to_string(),
        endpoint: endpoint.to_string(),
        token: None,
        ping_topic: "ping-results".to_string(),
        status_topic: "status-updates".to_string(),
    }
}

#[tokio::test]
async fn test_bus_outage_does_not_block_sink_delivery() {
    let bus = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&bus)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/projects/sentry-test/topics/status-updates:publish$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&bus)
        .await;

    let config = bus_config(&bus.uri());
    let cancel = CancellationToken::new();
    let bus_tx = BusPublisherActor::spawn(
        Arc::new(PubSubBus::new(reqwest::Client::new(), &config)),
        config,
        cancel.clone(),
    );

    let sink = create_sink(200).await;
    let dispatch = DispatchHandle::spawn(
        DispatchConfig {
            scan_interval: Duration::from_secs(3600),
            ..DispatchConfig::new(Some(sink_url(&sink)))
        },
        reqwest::Client::new(),
        Some(bus_tx),
        cancel.clone(),
    );

    dispatch.funnel().send(status_event("Acme", "Degraded")).await.unwrap();

    wait_for_requests(&sink, 1).await;
    let bus_requests = wait_for_requests(&bus, 3).await;

    let publishes = bus_requests
        .iter()
        .filter(|request| request.url.path().ends_with(":publish"))
        .count();
    assert_eq!(publishes, 1, "bus failures are not retried");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.published, 1);

    cancel.cancel();
}
