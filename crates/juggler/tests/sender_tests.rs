//! End-to-end tests for the juggler sender against a mocked juggler API.
//!
//! The payload fixture holds six hosts under two metahosts (`front`, `back`),
//! each with a `5xx` and a `4xx` metric, so the `ensure_check` plugin emits
//! twelve events split evenly between the two check-owning hosts.

use std::path::PathBuf;
use std::time::Duration;

use common::{AggregationResult, CallContext, MultiHostClient, Sender};
use juggler::script::{self, ScriptEngine, ScriptHandle};
use juggler::{CheckCache, Config, JugglerSender, LuaEngine, ScriptError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn testdata() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/testdata")
}

fn payload() -> Vec<AggregationResult> {
    let raw = std::fs::read_to_string(testdata().join("payload.yaml")).unwrap();
    serde_yaml::from_str(&raw).unwrap()
}

fn config(server: &MockServer, plugin: &str) -> Config {
    let address = server.address().to_string();
    serde_json::from_value(json!({
        "plugin": plugin,
        "plugins_dir": testdata().join("plugins"),
        "hosts": [address],
        "frontend": [address],
        "check_name": "testCheck",
        "description": "test description",
        "aggregator": "timed_more_than_limit_is_problem",
        "aggregator_kwargs": {
            "ignore_nodata": 1,
            "limits": [{"crit": "146%", "day_start": 1, "day_end": 7, "time_start": 20, "time_end": 8}]
        },
        "variables": {"nginx": "nginx_api"},
        "OK": ["${nginx}.get('5xx', 0)<0.060"],
        "CRIT": ["${nginx}.get('5xx', 0)>1.060"],
        "config": {
            "checks": {
                "testErr": {"query": "^[45]xx$", "status": "CRIT", "limit": 30}
            }
        }
    }))
    .unwrap()
}

fn sender(server: &MockServer, plugin: &str) -> JugglerSender {
    JugglerSender::new(
        "Test ID",
        config(server, plugin),
        MultiHostClient::default(),
        CheckCache::default(),
    )
    .unwrap()
}

async fn mount_checks(server: &MockServer) {
    let front = std::fs::read_to_string(testdata().join("checks/front.json")).unwrap();
    Mock::given(method("GET"))
        .and(path("/api/checks/checks"))
        .and(query_param("host_name", "front"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(front, "application/json"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/checks/checks"))
        .and(query_param("host_name", "back"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_partial_failure_is_reported_but_not_fatal() {
    let server = MockServer::start().await;
    mount_checks(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/checks/add_or_update"))
        .and(body_partial_json(json!({"host": "back"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend is read-only"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/checks/add_or_update"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success": true}"#))
        .mount(&server)
        .await;

    let summary = sender(&server, "ensure_check")
        .send_results(&CallContext::background(), &payload())
        .await
        .unwrap();
    assert_eq!(summary.to_string(), "failed to send 6/12 events");

    let requests = server.received_requests().await.unwrap();
    let events: Vec<serde_json::Value> = requests
        .iter()
        .filter(|r| r.url.path() == "/events")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(events.len(), 1, "only the front batch is delivered");
    let batch = events[0]["events"].as_array().unwrap();
    assert_eq!(batch.len(), 6);
    assert!(batch.iter().all(|e| e["host"].as_str().unwrap().starts_with("front")));
    assert_eq!(events[0]["source"], "combaine");
}

#[tokio::test]
async fn test_existing_checks_are_brought_in_line() {
    let server = MockServer::start().await;
    mount_checks(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/checks/add_or_update"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let summary = sender(&server, "ensure_check")
        .send_results(&CallContext::background(), &payload())
        .await
        .unwrap();
    assert_eq!((summary.failed, summary.total), (0, 12));

    let requests = server.received_requests().await.unwrap();
    let updates: Vec<serde_json::Value> = requests
        .iter()
        .filter(|r| r.url.path() == "/api/checks/add_or_update")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let front_4xx = updates
        .iter()
        .find(|u| u["host"] == "front" && u["service"] == "4xx")
        .unwrap();
    assert_eq!(front_4xx["ttl"], 900);
    assert_eq!(front_4xx["tags"], json!(["other", "combaine"]));
    assert_eq!(front_4xx["methods"], json!(["GOLEM"]));
    assert_eq!(front_4xx["aggregator"], "timed_more_than_limit_is_problem");
    assert_eq!(front_4xx["children"].as_array().unwrap().len(), 3);

    let front_5xx = updates
        .iter()
        .find(|u| u["host"] == "front" && u["service"] == "5xx")
        .unwrap();
    let children: Vec<&str> = front_5xx["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["host"].as_str().unwrap())
        .collect();
    assert_eq!(children, vec!["front1", "front2", "front3"]);

    assert_eq!(updates.iter().filter(|u| u["host"] == "back").count(), 2);
}

#[tokio::test]
async fn test_total_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/checks/checks"))
        .respond_with(ResponseTemplate::new(500).set_body_string("juggler is down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = sender(&server, "ensure_check")
        .send(&CallContext::background(), &payload())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to send 12/12 events");
}

#[tokio::test]
async fn test_every_update_rejected_is_an_error() {
    let server = MockServer::start().await;
    mount_checks(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/checks/add_or_update"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend is read-only"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = sender(&server, "ensure_check")
        .send(&CallContext::background(), &payload())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to send 12/12 events");

    let updates = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/checks/add_or_update")
        .count();
    assert_eq!(updates, 4);
}

#[tokio::test]
async fn test_expired_deadline_aborts_send() {
    let server = MockServer::start().await;

    let err = sender(&server, "ensure_check")
        .send(&CallContext::with_timeout(Duration::ZERO), &payload())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "context deadline exceeded");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_backend_hits_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/checks/checks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = sender(&server, "ensure_check")
        .send(&CallContext::with_timeout(Duration::from_millis(300)), &payload())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "context deadline exceeded");
}

#[tokio::test]
async fn test_cancelled_context_aborts_send() {
    let server = MockServer::start().await;
    let ctx = CallContext::background();
    ctx.cancel();

    let err = sender(&server, "ensure_check")
        .send(&ctx, &payload())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "context canceled");
}

#[tokio::test]
async fn test_plugin_without_entry_point() {
    let server = MockServer::start().await;

    let err = sender(&server, "incorrect")
        .send(&CallContext::background(), &payload())
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("Expected 'run' function inside plugin"),
        "{err}"
    );
}

#[tokio::test]
async fn test_malformed_plugin_result() {
    let server = MockServer::start().await;

    let err = sender(&server, "invalid_result")
        .send(&CallContext::background(), &payload())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid plugin result: Missing host for UnknownEntity; \
         Missing tag type for front1; result[3] is not a table"
    );
}

#[tokio::test]
async fn test_missing_plugin() {
    let server = MockServer::start().await;

    let err = sender(&server, "file_not_exists")
        .send(&CallContext::background(), &payload())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("plugin not found"), "{err}");
}

#[test]
fn test_plugin_environment() {
    let config: Config = serde_json::from_value(json!({
        "plugin": "test",
        "check_name": "testCheck",
        "description": "test description",
        "variables": {"nginx": "nginx_api"},
        "OK": ["${nginx}.get('5xx', 0)<0.060"],
        "config": {"checks": {}}
    }))
    .unwrap();
    let data = payload();
    let selected: Vec<&AggregationResult> = data.iter().collect();

    let mut handle = script::load_script(&LuaEngine, &testdata().join("plugins"), "test").unwrap();
    script::prepare_environment(handle.as_mut(), &config, &selected).unwrap();
    let status = handle.call("testEnv").unwrap();
    assert_eq!(status.as_text().as_deref(), Some("OK"));
}

#[test]
fn test_load_missing_plugin() {
    let err = script::load_script(&LuaEngine, &testdata(), "file_not_exists").err().unwrap();
    assert!(matches!(err, ScriptError::NotFound { .. }));
    assert_eq!(LuaEngine.extension(), "lua");
}

#[test]
#[serial_test::serial]
fn test_sender_config_from_env() {
    std::env::set_var(
        juggler::config::CONFIG_ENV,
        testdata().join("config/nonExistingJugglerConfig.yaml"),
    );
    assert!(juggler::SenderConfig::load().is_err());

    std::env::set_var(
        juggler::config::CONFIG_ENV,
        testdata().join("config/juggler_example.yaml"),
    );
    let config = juggler::SenderConfig::load().unwrap();
    assert_eq!(config.hosts[0], "host1");
    assert_eq!(config.frontend, vec!["front1"]);
    assert_eq!(config.cache_settings().ttl, Duration::from_secs(30));

    std::env::set_var(
        juggler::config::CONFIG_ENV,
        testdata().join("config/without_fronts.yaml"),
    );
    let config = juggler::SenderConfig::load().unwrap();
    assert_eq!(config.frontend, config.hosts);
    assert_eq!(
        config.plugins_dir,
        PathBuf::from(juggler::config::DEFAULT_PLUGINS_DIR)
    );

    std::env::remove_var(juggler::config::CONFIG_ENV);
}
