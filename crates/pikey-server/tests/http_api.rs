//! End-to-end tests of the HTTP API over a real socket.
//!
//! Each test serves the router on an ephemeral loopback port with the
//! recording driver behind it and talks to it with `reqwest`, the same way
//! a remote client would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pikey_core::KeyTable;
use pikey_server::application::{Dispatcher, Telemetry};
use pikey_server::domain::{ChannelConfig, DispatchConfig};
use pikey_server::infrastructure::drivers::mock::{RecordedAction, RecordingDriver};
use pikey_server::infrastructure::{http_api, ApiState, ChannelManager};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    base: String,
    driver: Arc<RecordingDriver>,
    _shutdown: oneshot::Sender<()>,
}

async fn start(config: DispatchConfig) -> TestServer {
    let keys = Arc::new(KeyTable::standard());
    let driver = Arc::new(RecordingDriver::new(Arc::clone(&keys)));
    let dispatcher = Dispatcher::new(
        driver.clone(),
        keys,
        Arc::new(Telemetry::new()),
        config,
    );
    let channel = Arc::new(ChannelManager::new(
        dispatcher.clone(),
        ChannelConfig::default(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let (addr, shutdown): (SocketAddr, _) = http_api::serve(
        listener,
        ApiState {
            dispatcher,
            channel,
        },
    )
    .await
    .expect("serve");
    TestServer {
        base: format!("http://{addr}"),
        driver,
        _shutdown: shutdown,
    }
}

async fn stats(server: &TestServer) -> Value {
    reqwest::get(format!("{}/stats", server.base))
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats json")
}

// ── /press ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_press_is_queued_then_counted() {
    // Arrange
    let server = start(DispatchConfig::default()).await;

    // Act
    let resp = reqwest::get(format!("{}/press?key=a&duration=50", server.base))
        .await
        .expect("request");
    let status = resp.status();
    let body = resp.text().await.expect("body");
    tokio::time::sleep(Duration::from_millis(250)).await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body, "queued");
    assert_eq!(server.driver.pressed_keys(), vec!["a"]);
    let s = stats(&server).await;
    assert_eq!(s["total_requests"], 1);
    assert_eq!(s["success_requests"], 1);
    assert!(s["average_latency_ms"].as_f64().expect("number") >= 50.0);
    assert_eq!(s["latency_history"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_press_accepts_post() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/press?key=enter", server.base))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_press_unknown_key_is_bad_request() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::get(format!("{}/press?key=notakey", server.base))
        .await
        .expect("request");

    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.expect("body").contains("notakey"));
    let s = stats(&server).await;
    assert_eq!(s["failed_requests"], 1);
}

#[tokio::test]
async fn test_press_without_key_is_bad_request() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::get(format!("{}/press", server.base))
        .await
        .expect("request");

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_overlapping_press_is_refused_with_429() {
    // Arrange: the first press holds the device for half a second.
    let server = start(DispatchConfig::default()).await;
    let first = reqwest::get(format!("{}/press?key=a&duration=500", server.base))
        .await
        .expect("first");
    assert_eq!(first.status(), 200);

    // Act
    let second = reqwest::get(format!("{}/press?key=b", server.base))
        .await
        .expect("second");

    // Assert
    assert_eq!(second.status(), 429);
    let s = stats(&server).await;
    assert_eq!(s["rejected_requests"], 1);
}

// ── /press-sync ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_press_sync_waits_for_completion() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::get(format!("{}/press-sync?key=space&duration=30", server.base))
        .await
        .expect("request");

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "ok");
    assert_eq!(server.driver.pressed_keys(), vec!["space"]);
}

#[tokio::test]
async fn test_press_sync_reports_device_failure() {
    let server = start(DispatchConfig::default()).await;
    server.driver.set_failure(Some("unplugged".into()));

    let resp = reqwest::get(format!("{}/press-sync?key=a", server.base))
        .await
        .expect("request");

    assert_eq!(resp.status(), 500);
    assert!(resp.text().await.expect("body").contains("unplugged"));
}

// ── /actions ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_actions_runs_batch_in_order() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/actions", server.base))
        .json(&serde_json::json!([
            {"key": "h", "duration": 10},
            {"key": "i", "duration": 0},
            {"key": "enter"}
        ]))
        .send()
        .await
        .expect("request");
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(server.driver.pressed_keys(), vec!["h", "i", "enter"]);
    match &server.driver.actions()[1] {
        RecordedAction::Press { hold, .. } => assert_eq!(*hold, Duration::from_millis(50)),
        other => panic!("unexpected action {other:?}"),
    }
}

#[tokio::test]
async fn test_actions_with_bad_key_runs_nothing() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/actions", server.base))
        .json(&serde_json::json!([{"key": "a"}, {"key": "zz"}]))
        .send()
        .await
        .expect("request");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(resp.status(), 400);
    assert!(server.driver.actions().is_empty());
    let s = stats(&server).await;
    assert_eq!(s["failed_requests"], 1);
    assert_eq!(s["total_requests"], 1);
}

#[tokio::test]
async fn test_actions_rejects_malformed_body() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/actions", server.base))
        .body("{not json")
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_actions_over_batch_limit_is_429() {
    let server = start(DispatchConfig {
        max_batch: 2,
        ..DispatchConfig::default()
    })
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/actions", server.base))
        .json(&serde_json::json!([{"key": "a"}, {"key": "b"}, {"key": "c"}]))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), 429);
}

// ── /type ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_type_presses_each_character() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/type", server.base))
        .json(&serde_json::json!({"text": "hi 1"}))
        .send()
        .await
        .expect("request");
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "queued");
    assert_eq!(server.driver.pressed_keys(), vec!["h", "i", "space", "1"]);
}

#[tokio::test]
async fn test_type_empty_text_is_bad_request() {
    let server = start(DispatchConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/type", server.base))
        .json(&serde_json::json!({"text": ""}))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), 400);
}

// ── /stats and /health ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stats_reports_all_fields_before_any_request() {
    let server = start(DispatchConfig::default()).await;

    let s = stats(&server).await;

    for field in [
        "total_requests",
        "success_requests",
        "failed_requests",
        "rejected_requests",
        "average_latency_ms",
        "last_request_time",
        "currently_processing",
        "success_rate",
        "latency_breakdown",
        "latency_history",
        "driver",
        "dispatch_policy",
        "channel",
    ] {
        assert!(s.get(field).is_some(), "missing field {field}");
    }
    assert_eq!(s["last_request_time"], "");
    assert_eq!(s["driver"], "mock");
    assert_eq!(s["dispatch_policy"], "serialized");
    assert_eq!(s["channel"]["active_connections"], 0);
}

#[tokio::test]
async fn test_health_is_ok() {
    let server = start(DispatchConfig::default()).await;

    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    assert_eq!(body["status"], "ok");
}
