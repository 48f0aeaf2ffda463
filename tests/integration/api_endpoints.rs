//! Listeners served over real sockets

use crate::helpers::*;
use pretty_assertions::assert_eq;
use status_sentry::{
    actors::{
        scheduler::SchedulerHandle,
        state::{PullOutputs, StateHandle},
    },
    api::{ControlState, IngressState, spawn_control_server, spawn_ingress_server},
    config::ConfigSource,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

// ============================================================================
// Ingress
// ============================================================================

#[tokio::test]
async fn test_webhook_update_is_delivered_to_sink() {
    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let state = StateHandle::spawn(PullOutputs::new(), cancel.clone());
    state
        .replace_schedule(vec![create_test_target("Acme", "webhook:/acme", vec![])])
        .await
        .unwrap();

    let addr = spawn_ingress_server(
        any_port(),
        IngressState {
            state: Some(state),
            pool: None,
            events: dispatch.funnel(),
        },
        cancel.clone(),
    )
    .await
    .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/webhook/Acme"))
        .body("Investigating login failures")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let requests = wait_for_requests(&sink, 1).await;
    let body = body_json(&requests[0]);
    assert_eq!(body["display_name"], "Acme");
    assert_eq!(body["raw_message"], "Investigating login failures");

    let response = client
        .post(format!("http://{addr}/webhook/Unknown"))
        .body("ignored")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    cancel.cancel();
}

#[tokio::test]
async fn test_on_demand_probe() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&site)
        .await;

    let (events, _event_rx) = tokio::sync::mpsc::channel(8);
    let cancel = CancellationToken::new();
    let addr = spawn_ingress_server(
        any_port(),
        IngressState {
            state: None,
            pool: Some(spawn_pool()),
            events,
        },
        cancel.clone(),
    )
    .await
    .unwrap();

    let client = reqwest::Client::new();
    let page = format!("{}/", site.uri());

    let by_query: serde_json::Value = client
        .get(format!("http://{addr}/probe"))
        .query(&[("page", page.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_query["pinged_url"], page);
    assert_eq!(by_query["ping_response_code"], 200);

    let by_body = client
        .post(format!("http://{addr}/probe"))
        .json(&serde_json::json!({ "page": page }))
        .send()
        .await
        .unwrap();
    assert_eq!(by_body.status(), 200);

    let missing = client
        .get(format!("http://{addr}/probe"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    cancel.cancel();
}

// ============================================================================
// Control
// ============================================================================

#[tokio::test]
async fn test_refresh_from_file_updates_both_sides() {
    let dir = std::env::temp_dir().join(format!("status-sentry-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let config_path = dir.join("config.json");
    std::fs::write(
        &config_path,
        r#"[
            {
                "service_name": "Acme",
                "service_domain": "acme.com",
                "status_source": "webhook:/acme",
                "poll_frequency": "10m",
                "poll_pages": []
            },
            {
                "service_name": "Beta",
                "service_domain": "beta.io",
                "status_source": "rss:https://status.beta.io/history.rss"
            }
        ]"#,
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let state = StateHandle::spawn(PullOutputs::new(), cancel.clone());
    let (events, _event_rx) = tokio::sync::mpsc::channel(8);
    let scheduler = SchedulerHandle::spawn_with_interval(
        vec![],
        spawn_pool(),
        events,
        cancel.clone(),
        Duration::from_secs(3600),
    );

    let addr = spawn_control_server(
        any_port(),
        ControlState {
            source: ConfigSource::File(config_path),
            client: reqwest::Client::new(),
            state: Some(state.clone()),
            scheduler: Some(scheduler.clone()),
        },
        cancel.clone(),
    )
    .await
    .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/config/refresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");

    assert_eq!(state.snapshot().await.unwrap().len(), 2);
    let targets = scheduler.snapshot().await.unwrap();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].poll_frequency, Duration::from_secs(600));

    let other = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 400);

    cancel.cancel();
    std::fs::remove_dir_all(&dir).ok();
}
