//! CORS preflight and proxy fallback.

mod common;

use common::{environment, Harness};
use mimic_server::HeaderEntry;
use serde_json::json;

#[tokio::test]
async fn test_preflight_answered_with_live_headers() {
    let env = environment(json!({
        "uuid": "env",
        "routes": [{ "method": "get", "endpoint": "users" }]
    }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    let response = harness
        .client
        .request(reqwest::Method::OPTIONS, format!("{base}/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap()
        .contains("PATCH"));

    harness.store.update("env", |env| {
        env.headers.push(HeaderEntry::new(
            "Access-Control-Allow-Origin",
            "https://app.test",
        ));
    });
    let response = harness
        .client
        .request(reqwest::Method::OPTIONS, format!("{base}/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.test"
    );

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_user_options_route_wins_over_preflight() {
    let env = environment(json!({
        "uuid": "env",
        "routes": [{ "method": "options", "endpoint": "custom", "statusCode": 204 }]
    }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    let response = harness
        .client
        .request(reqwest::Method::OPTIONS, format!("{base}/custom"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_cors_disabled_leaves_options_unhandled() {
    let env = environment(json!({ "uuid": "env", "cors": false }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    let response = harness
        .client
        .request(reqwest::Method::OPTIONS, format!("{base}/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_unmatched_requests_are_proxied_with_body_intact() {
    let upstream = environment(json!({
        "uuid": "upstream",
        "routes": [{
            "method": "post",
            "endpoint": "orders",
            "statusCode": 201,
            "body": "{{bodyRaw}}",
            "headers": [{ "key": "X-Upstream", "value": "{{header 'host'}}" }]
        }]
    }));
    let harness = Harness::new(vec![upstream]);
    let upstream_base = harness.start("upstream").await;

    let front = environment(json!({
        "uuid": "front",
        "proxyMode": true,
        "proxyHost": upstream_base.clone(),
        "routes": [{ "endpoint": "local", "body": "served locally" }]
    }));
    harness.store.upsert(front);
    let front_base = harness.start("front").await;

    let payload = r#"{"item":"book","qty":2}"#;
    let response = harness
        .client
        .post(format!("{front_base}/orders?src=test"))
        .header("content-type", "application/json")
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    // Host is rewritten to the upstream authority
    assert_eq!(
        response.headers()["x-upstream"],
        upstream_base.trim_start_matches("http://")
    );
    assert_eq!(response.text().await.unwrap(), payload);

    let response = harness.client.get(format!("{front_base}/local")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "served locally");

    let front_log = harness.engine.logs("front");
    assert_eq!(front_log.len(), 2);
    assert!(!front_log[0].proxied);
    assert!(front_log[1].proxied);
    assert_eq!(front_log[1].body, payload);

    let upstream_log = harness.engine.logs("upstream");
    assert_eq!(upstream_log.len(), 1);
    assert_eq!(upstream_log[0].body, payload);
    assert_eq!(
        upstream_log[0].headers.get("content-length").map(String::as_str),
        Some("23")
    );

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let env = environment(json!({
        "uuid": "env",
        "proxyMode": true,
        "proxyHost": "http://127.0.0.1:1"
    }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    let response = harness.client.get(format!("{base}/x")).send().await.unwrap();
    assert_eq!(response.status(), 502);

    harness.engine.stop_all().await;
}

#[tokio::test]
async fn test_invalid_proxy_target_disables_proxy() {
    let env = environment(json!({
        "uuid": "env",
        "proxyMode": true,
        "proxyHost": "not-a-url"
    }));
    let harness = Harness::new(vec![env]);
    let base = harness.start("env").await;

    let response = harness.client.get(format!("{base}/x")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert!(!harness.engine.logs("env")[0].proxied);

    harness.engine.stop_all().await;
}
