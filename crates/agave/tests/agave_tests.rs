//! Agave sender against mocked agave hosts.

use agave::{AgaveConfig, AgaveError, AgaveSender};
use common::{AggregationResult, CallContext, MultiHostClient, Sender};
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn data() -> Vec<AggregationResult> {
    serde_yaml::from_str(
        r#"
- Tags: {type: host, name: front1, metahost: front, aggregate: nginx}
  Result: {"2xx": 100, "5xx": 3}
- Tags: {type: host, name: front2, metahost: front, aggregate: nginx}
  Result: {"2xx": 90, "5xx": 0}
- Tags: {type: metahost, name: front, metahost: front, aggregate: nginx}
  Result: {"2xx": 190, "5xx": 3}
- Tags: {type: host, name: front1, metahost: front, aggregate: ignored}
  Result: 1
"#,
    )
    .unwrap()
}

fn config(hosts: Vec<String>) -> AgaveConfig {
    serde_json::from_value(serde_json::json!({
        "items": ["nginx.2xx", "nginx.5xx"],
        "hosts": hosts,
        "graph_name": "http_codes",
        "graph_template": "http_codes",
        "step": 300
    }))
    .unwrap()
}

#[tokio::test]
async fn test_points_are_sent_per_subgroup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/update/front-front1/http_codes"))
        .and(query_param("step", "300"))
        .and(header("user-agent", "Yandex/CombaineClient"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/update/front-front2/http_codes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/update/front/http_codes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = AgaveSender::new(
        "Test ID",
        config(vec![server.address().to_string()]),
        MultiHostClient::default(),
    )
    .unwrap();
    assert_eq!(sender.name(), "agave");
    sender.send(&CallContext::background(), &data()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let front1 = requests
        .iter()
        .find(|r| r.url.path() == "/api/update/front-front1/http_codes")
        .unwrap();
    assert!(front1.url.query().unwrap().starts_with("values=2xx:100+5xx:3&ts="));
}

#[tokio::test]
async fn test_partial_host_failure_is_tolerated() {
    let good = MockServer::start().await;
    let bad = MockServer::start().await;
    Mock::given(path_regex("^/api/update/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&good)
        .await;
    Mock::given(path_regex("^/api/update/"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&bad)
        .await;

    let sender = AgaveSender::new(
        "Test ID",
        config(vec![bad.address().to_string(), good.address().to_string()]),
        MultiHostClient::default(),
    )
    .unwrap();
    let failed = sender
        .send_points(&CallContext::background(), &data())
        .await
        .unwrap();
    assert_eq!(failed, 3);
}

#[tokio::test]
async fn test_every_attempt_failing_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(path_regex("^/api/update/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("broken"))
        .mount(&server)
        .await;

    let sender = AgaveSender::new(
        "Test ID",
        config(vec![server.address().to_string()]),
        MultiHostClient::default(),
    )
    .unwrap();
    let err = sender
        .send_points(&CallContext::background(), &data())
        .await
        .unwrap_err();
    match err {
        AgaveError::TotalFailure { failed, total, .. } => assert_eq!((failed, total), (3, 3)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cancelled_context() {
    let server = MockServer::start().await;
    let sender = AgaveSender::new(
        "Test ID",
        config(vec![server.address().to_string()]),
        MultiHostClient::default(),
    )
    .unwrap();
    let ctx = CallContext::background();
    ctx.cancel();

    let err = sender.send(&ctx, &data()).await.unwrap_err();
    assert_eq!(err.to_string(), "context canceled");
}

#[tokio::test]
async fn test_nothing_to_send() {
    let sender = AgaveSender::new(
        "Test ID",
        config(vec!["127.0.0.1:1".into()]),
        MultiHostClient::default(),
    )
    .unwrap();
    let failed = sender
        .send_points(&CallContext::background(), &[])
        .await
        .unwrap();
    assert_eq!(failed, 0);
}
