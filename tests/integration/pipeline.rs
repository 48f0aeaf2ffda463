//! End-to-end flows from a producer through the dispatcher to the sink

use crate::helpers::*;
use pretty_assertions::assert_eq;
use status_sentry::{
    actors::{
        scheduler::SchedulerHandle,
        state::{PullOutputs, StateHandle},
    },
    collectors::{CollectorActor, RssSource},
    config::HookKind,
};
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Single-item feed published `minutes_ago`
fn feed(minutes_ago: i64) -> (String, DateTime<Utc>) {
    let published = Utc::now()
        .with_nanosecond(0)
        .unwrap()
        - chrono::Duration::minutes(minutes_ago);

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Acme Status</title>
    <item>
      <title>Degraded API performance</title>
      <pubDate>{}</pubDate>
      <description>&lt;p&gt;We are investigating elevated latency.&lt;/p&gt;</description>
    </item>
  </channel>
</rss>"#,
        published.to_rfc2822()
    );
    (xml, published)
}

// ============================================================================
// Probe pipeline
// ============================================================================

#[tokio::test]
async fn test_scheduled_probe_reaches_sink() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&site)
        .await;

    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));

    let target = create_test_target("Acme", "webhook:/acme", vec![format!("{}/", site.uri())]);
    let scheduler = SchedulerHandle::spawn_with_interval(
        vec![target],
        spawn_pool(),
        dispatch.funnel(),
        CancellationToken::new(),
        Duration::from_secs(3600),
    );

    let probed = scheduler.sweep_now().await.unwrap();
    assert!(probed <= 1, "first tick may already have probed the target");

    let requests = wait_for_requests(&sink, 1).await;
    assert_eq!(requests.len(), 1, "a single page yields a single event");

    let body = body_json(&requests[0]);
    assert_eq!(body["pinged_url"], format!("{}/", site.uri()));
    assert_eq!(body["ping_response_code"], 200);
    assert_eq!(body["service_name"], "Acme");
    assert!(body["event_id"].is_string());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_fresh_target_is_not_probed_twice() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&site)
        .await;

    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));

    let target = create_test_target("Acme", "webhook:/acme", vec![format!("{}/", site.uri())]);
    let scheduler = SchedulerHandle::spawn_with_interval(
        vec![target],
        spawn_pool(),
        dispatch.funnel(),
        CancellationToken::new(),
        Duration::from_secs(3600),
    );

    wait_for_requests(&sink, 1).await;
    let second = scheduler.sweep_now().await.unwrap();

    assert_eq!(second, 0, "poll frequency has not elapsed yet");
    assert_eq!(site.received_requests().await.unwrap().len(), 1);

    let snapshot = scheduler.snapshot().await.unwrap();
    assert!(snapshot[0].last_probed_at.is_some());
}

// ============================================================================
// Status pipeline
// ============================================================================

#[tokio::test]
async fn test_rss_pull_reaches_sink() {
    let (xml, published) = feed(30);
    let feed = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history.rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(&feed)
        .await;

    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let rss = CollectorActor::spawn(
        RssSource::new(reqwest::Client::new()),
        dispatch.funnel(),
        cancel.clone(),
    );
    let state = StateHandle::spawn_with_interval(
        PullOutputs::new().with(HookKind::Rss, rss),
        cancel.clone(),
        Duration::from_secs(3600),
    );

    let hook = format!("rss:{}/history.rss", feed.uri());
    state
        .replace_schedule(vec![
            create_test_target("Acme", &hook, vec![]),
            create_test_target("Other", "webhook:/other", vec![]),
        ])
        .await
        .unwrap();

    let handed_out = state.pull_now().await.unwrap();
    assert_eq!(handed_out, 1, "only the rss partition is pulled");

    let requests = wait_for_requests(&sink, 1).await;
    assert_eq!(requests.len(), 1);

    let body = body_json(&requests[0]);
    assert_eq!(body["display_name"], "Acme");
    assert_eq!(body["message"], "We are investigating elevated latency.");
    assert_eq!(
        body["pub_date"],
        published.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    );

    cancel.cancel();
}

#[tokio::test]
async fn test_repeated_pull_forwards_update_once() {
    let (xml, _) = feed(30);
    let feed = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(&feed)
        .await;

    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let rss = CollectorActor::spawn(
        RssSource::new(reqwest::Client::new()),
        dispatch.funnel(),
        cancel.clone(),
    );
    let state = StateHandle::spawn_with_interval(
        PullOutputs::new().with(HookKind::Rss, rss),
        cancel.clone(),
        Duration::from_secs(3600),
    );
    state
        .replace_schedule(vec![create_test_target(
            "Acme",
            &format!("rss:{}/", feed.uri()),
            vec![],
        )])
        .await
        .unwrap();

    state.pull_now().await.unwrap();
    wait_for_requests(&sink, 1).await;
    state.pull_now().await.unwrap();
    wait_for_requests(&feed, 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = dispatch.stats().await.unwrap();
    assert_eq!(stats.received, 1, "the watermark stops the second copy");
    assert_eq!(sink.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_feed_item_is_ignored() {
    let (xml, _) = feed(48 * 60);
    let feed = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(&feed)
        .await;

    let sink = create_sink(200).await;
    let dispatch = spawn_dispatch(&sink, Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let rss = CollectorActor::spawn(
        RssSource::new(reqwest::Client::new()),
        dispatch.funnel(),
        cancel.clone(),
    );
    let state = StateHandle::spawn_with_interval(
        PullOutputs::new().with(HookKind::Rss, rss),
        cancel.clone(),
        Duration::from_secs(3600),
    );
    state
        .replace_schedule(vec![create_test_target(
            "Acme",
            &format!("rss:{}/", feed.uri()),
            vec![],
        )])
        .await
        .unwrap();

    state.pull_now().await.unwrap();
    wait_for_requests(&feed, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(dispatch.stats().await.unwrap().received, 0);

    cancel.cancel();
}
