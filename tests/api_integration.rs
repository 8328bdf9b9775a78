//! End-to-end tests over the HTTP API.

use serde_json::json;

use metrics_usage::config::{OverflowPolicy, UsageConfig};
use metrics_usage::lifecycle::Shutdown;
use metrics_usage::registry::{Registry, RegistryState};

mod common;

fn scan(id: &str, origin: &str, metrics: &[&str]) -> serde_json::Value {
    json!({
        "source": { "id": id, "origin": origin },
        "valid_metrics": metrics,
        "invalid_metrics": [],
    })
}

#[tokio::test]
async fn test_dashboard_edit_clears_metric() {
    let service = common::spawn_service(UsageConfig::default()).await;

    let status = service
        .post_json("/api/v1/usage", scan("dash-1", "grafana", &["run", "service_color"]))
        .await;
    assert_eq!(status, 202);
    service.flush().await;

    let (status, body) = service.get_json("/api/v1/metrics/run").await;
    assert_eq!(status, 200);
    assert_eq!(body["found"], true);
    assert_eq!(body["sources"][0]["id"], "dash-1");
    assert_eq!(body["sources"][0]["origin"], "grafana");

    service
        .post_json("/api/v1/usage", scan("dash-1", "grafana", &["service_color"]))
        .await;
    service.flush().await;

    let (status, body) = service.get_json("/api/v1/metrics/run").await;
    assert_eq!(status, 404);
    assert_eq!(body["found"], false);
    assert_eq!(body["sources"].as_array().unwrap().len(), 0);

    let (_, body) = service.get_json("/api/v1/metrics/service_color").await;
    assert_eq!(body["sources"][0]["id"], "dash-1");

    service.stop().await;
}

#[tokio::test]
async fn test_invalid_usage_lifecycle() {
    let service = common::spawn_service(UsageConfig::default()).await;

    let body = json!({
        "source": { "id": "rule-1", "origin": "prometheus_rule" },
        "invalid_metrics": [{ "expression": "up{job=", "detail": "parse error" }],
    });
    assert_eq!(service.post_json("/api/v1/usage", body).await, 202);
    service.flush().await;

    let (_, invalid) = service.get_json("/api/v1/invalid_metrics").await;
    let invalid = invalid.as_array().unwrap();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0]["expression"], "up{job=");
    assert_eq!(invalid[0]["source"]["id"], "rule-1");
    assert_eq!(invalid[0]["detail"], "parse error");

    service
        .post_json("/api/v1/usage", scan("rule-1", "prometheus_rule", &[]))
        .await;
    service.flush().await;

    let (_, invalid) = service.get_json("/api/v1/invalid_metrics").await;
    assert!(invalid.as_array().unwrap().is_empty());

    service.stop().await;
}

#[tokio::test]
async fn test_malformed_facts_are_acknowledged_and_counted() {
    let service = common::spawn_service(UsageConfig::default()).await;

    let body = json!({
        "facts": [
            { "metric": "", "source": { "id": "d1", "origin": "grafana" }, "kind": "valid" },
            { "metric": "up", "source": { "id": "d1", "origin": "grafana" }, "kind": "valid" },
            { "metric": "bad{", "source": { "id": "d1", "origin": "grafana" }, "kind": "invalid", "detail": "oops" },
        ]
    });
    assert_eq!(service.post_json("/api/v1/usage/facts", body).await, 202);
    service.flush().await;

    let (_, stats) = service.get_json("/api/v1/stats").await;
    assert_eq!(stats["facts_rejected"], 1);
    assert_eq!(stats["facts_applied"], 2);
    assert_eq!(stats["metrics"], 1);
    assert_eq!(stats["invalid_usages"], 1);
    assert_eq!(stats["pending"], 0);

    service.stop().await;
}

#[tokio::test]
async fn test_list_filters_and_export() {
    let service = common::spawn_service(UsageConfig::default()).await;

    service
        .post_json("/api/v1/usage", scan("d1", "grafana", &["node_load1", "up"]))
        .await;
    service.flush().await;
    service
        .post_json("/api/v1/usage", scan("g1", "prometheus_rule", &["up", "node_memory_bytes"]))
        .await;
    service.flush().await;

    let (_, page) = service.get_json("/api/v1/metrics").await;
    assert_eq!(page["total"], 3);

    let (_, page) = service.get_json("/api/v1/metrics?origin=grafana").await;
    let names: Vec<_> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["node_load1", "up"]);

    let (_, page) = service.get_json("/api/v1/metrics?prefix=node_&limit=1&offset=1").await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["name"], "node_memory_bytes");

    let (_, export) = service.get_json("/api/v1/export").await;
    assert_eq!(export["generation"], 2);
    assert_eq!(export["metrics"].as_array().unwrap().len(), 3);

    service.stop().await;
}

#[tokio::test]
async fn test_request_id_and_rejections() {
    let service = common::spawn_service(UsageConfig::default()).await;

    let res = service.client.get(service.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));

    let res = service
        .client
        .get(service.url("/health"))
        .header("x-request-id", "given-id")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "given-id");

    let res = service
        .client
        .post(service.url("/api/v1/usage"))
        .header("content-type", "application/json")
        .body("{\"source\": 42}")
        .send()
        .await
        .unwrap();
    assert!(res.status().is_client_error());

    service.stop().await;
}

#[tokio::test]
async fn test_full_queue_answers_503() {
    let mut config = UsageConfig::default();
    config.ingest.capacity = Some(1);
    config.ingest.overflow = OverflowPolicy::DropNewest;

    // Engine not running yet, so the single slot stays taken.
    let (registry, engine) = Registry::build(RegistryState::new(), &config.ingest);
    let (addr, server_shutdown, server) = common::spawn_server(&config, &registry).await;
    let client = common::client();
    let url = |path: &str| format!("http://{}{}", addr, path);

    let res = client
        .post(url("/api/v1/usage"))
        .json(&scan("dash-1", "grafana", &["run"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 202);

    let res = client
        .post(url("/api/v1/usage"))
        .json(&scan("dash-2", "grafana", &["up"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["message"].is_string());

    let stats: serde_json::Value = client
        .get(url("/api/v1/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["batches_enqueued"], 1);
    assert_eq!(stats["batches_dropped"], 1);

    let engine_shutdown = Shutdown::new();
    let engine_task = tokio::spawn(engine.run(engine_shutdown.subscribe()));
    registry.queue.flush().await.unwrap();

    assert!(registry.query.get_metric("run").found);
    assert!(!registry.query.get_metric("up").found);

    server_shutdown.trigger();
    let _ = server.await;
    engine_shutdown.trigger();
    let _ = engine_task.await;
}
