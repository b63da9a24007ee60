//! Start/stop, status reporting, TLS and events.

mod common;

use common::{environment, Harness};
use mimic_server::{event_bus, AlertKind, EngineError, EngineEvent, Route};
use serde_json::json;
use std::net::TcpListener;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_start_reports_running_and_stop_reports_stopped() {
    let env = environment(json!({ "uuid": "env", "routes": [{ "endpoint": "ping" }] }));
    let harness = Harness::new(vec![env]);

    // stopping before start is a no-op
    assert!(!harness.engine.stop("env").await);
    assert!(!harness.store.status("env").unwrap().running);

    let base = harness.start("env").await;
    assert!(harness.engine.is_running("env"));
    assert!(harness.engine.local_addr("env").is_some());
    let status = harness.store.status("env").unwrap();
    assert!(status.running);
    assert!(!status.need_restart);

    let response = harness.client.get(format!("{base}/ping")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    assert!(harness.engine.stop("env").await);
    assert!(!harness.engine.is_running("env"));
    assert!(!harness.store.status("env").unwrap().running);

    // the pooled keep-alive connection was closed along with the listener
    assert!(harness.client.get(format!("{base}/ping")).send().await.is_err());

    // and the port can be started again
    harness.start("env").await;
    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_stop_does_not_wait_for_slow_requests() {
    let env = environment(json!({
        "uuid": "env",
        "routes": [{ "endpoint": "slow", "latency": 30000 }]
    }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    let pending = tokio::spawn(harness.client.get(format!("{base}/slow")).send());

    // the request is in flight once it shows up in the log
    let mut logged = false;
    for _ in 0..100 {
        if !harness.engine.logs("env").is_empty() {
            logged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(logged);

    let started = Instant::now();
    assert!(harness.engine.stop("env").await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!harness.store.status("env").unwrap().running);

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let env = environment(json!({ "uuid": "env" }));
    let harness = Harness::new(vec![env]);
    harness.start("env").await;

    let err = harness.engine.start("env").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));
    assert_eq!(harness.engine.running_ids(), vec!["env".to_string()]);

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_port_in_use_is_reported() {
    let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let env = environment(json!({ "uuid": "env", "port": port }));
    let mut harness = Harness::new(vec![env]);

    let err = harness.engine.start("env").await.unwrap_err();
    assert!(matches!(err, EngineError::PortInUse(p) if p == port));
    assert!(!harness.engine.is_running("env"));
    assert!(!harness.store.status("env").unwrap().running);
    assert_eq!(harness.alerts_of(AlertKind::PortInUse).len(), 1);

    // the engine stays usable once the port frees up
    drop(blocker);
    harness.start("env").await;
    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_unknown_environment() {
    let harness = Harness::new(vec![]);
    let err = harness.engine.start("ghost").await.unwrap_err();
    assert!(matches!(err, EngineError::EnvironmentNotFound(_)));
}

#[tokio::test]
async fn test_https_environment() {
    let env = environment(json!({
        "uuid": "env",
        "https": true,
        "routes": [{ "endpoint": "secure", "body": "tls ok" }]
    }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;
    assert!(base.starts_with("https://"));

    let response = harness.client.get(format!("{base}/secure")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "tls ok");

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_routing_edits_flag_need_restart() {
    let env = environment(json!({ "uuid": "env", "routes": [{ "endpoint": "a" }] }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    // live fields do not need a restart
    harness.store.update("env", |env| env.latency = 10);
    assert!(!harness.engine.environment_updated("env"));
    assert!(!harness.store.status("env").unwrap().need_restart);

    harness.store.update("env", |env| {
        env.routes.push(Route {
            endpoint: "b".to_string(),
            body: "new".to_string(),
            ..Default::default()
        });
    });
    assert!(harness.engine.environment_updated("env"));
    let status = harness.store.status("env").unwrap();
    assert!(status.running);
    assert!(status.need_restart);

    // the routing table is fixed until the next start
    let response = harness.client.get(format!("{base}/b")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    harness.engine.stop("env").await;
    let base = harness.start("env").await;
    assert!(!harness.store.status("env").unwrap().need_restart);
    let response = harness.client.get(format!("{base}/b")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "new");

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_deleted_event_stops_and_discards_log() {
    let env = environment(json!({ "uuid": "env" }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;
    harness.client.get(format!("{base}/x")).send().await.unwrap();
    assert_eq!(harness.engine.logs("env").len(), 1);

    let (events, rx) = event_bus(8);
    let listener = harness.engine.clone().spawn_event_listener(rx);

    harness.store.remove("env");
    events
        .send(EngineEvent::EnvironmentDeleted("env".to_string()))
        .unwrap();

    let mut stopped = false;
    for _ in 0..50 {
        if !harness.engine.is_running("env") && harness.engine.logs("env").is_empty() {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(stopped);

    drop(events);
    tokio::time::timeout(Duration::from_secs(2), listener)
        .await
        .unwrap()
        .unwrap();
}
