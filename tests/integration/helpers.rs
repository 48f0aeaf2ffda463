//! Helper functions for integration tests

use std::time::Duration;

use status_sentry::{
    actors::dispatch::{DispatchConfig, DispatchHandle, RetryPolicy},
    config::{Hook, Target},
    probe::{ProbePool, Prober},
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub fn create_test_target(name: &str, hook: &str, pages: Vec<String>) -> Target {
    Target {
        name: name.to_string(),
        domain: format!("{}.com", name.to_lowercase()),
        status_page: format!("https://status.{}.com", name.to_lowercase()),
        hook: hook.parse::<Hook>().unwrap(),
        poll_frequency: Duration::from_secs(300),
        pages,
        last_probed_at: None,
    }
}

/// Sink answering every POST with `status`
pub async fn create_sink(status: u16) -> MockServer {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&sink)
        .await;
    sink
}

pub fn sink_url(sink: &MockServer) -> String {
    format!("{}/events", sink.uri())
}

/// Dispatch actor delivering to `sink`, idle scans only on request
pub fn spawn_dispatch(sink: &MockServer, initial_backoff: Duration) -> DispatchHandle {
    let config = DispatchConfig {
        sink_url: Some(sink_url(sink)),
        retry: RetryPolicy {
            initial_backoff,
            ..RetryPolicy::default()
        },
        scan_interval: Duration::from_secs(3600),
    };

    DispatchHandle::spawn(config, reqwest::Client::new(), None, CancellationToken::new())
}

pub fn spawn_pool() -> ProbePool {
    ProbePool::spawn(
        4,
        Prober::new(Duration::from_secs(5)).unwrap(),
        CancellationToken::new(),
    )
}

/// Wait until `server` has seen at least `count` requests
pub async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<Request> {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count {
            return requests;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    server.received_requests().await.unwrap_or_default()
}

pub fn body_json(request: &Request) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}
