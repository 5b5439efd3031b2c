//! Juggler HTTP API: check reads, check updates and event batches.
//!
//! Reads go to the frontend hosts through the shared [`CheckCache`], keyed
//! by the check-owning host. Updates go to the write hosts with an OAuth
//! header when a token is configured.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{CallContext, HostRequest, HttpError, MultiHostClient};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::CheckCache;
use crate::config::{null_as_default, AggregatorArgs, Config, FlapConfig};
use crate::error::JugglerError;
use crate::script::Event;

const CHECKS_PATH: &str = "/api/checks/checks";
const UPDATE_CHECK_PATH: &str = "/api/checks/add_or_update?do=1";
const EVENTS_PATH: &str = "/events";
const EVENTS_SOURCE: &str = "combaine";

/// Marker type of every child reference.
pub const CHILD_TYPE: &str = "HOST";

/// Checks by host, then by service.
pub type HostChecks = BTreeMap<String, BTreeMap<String, CheckDefinition>>;

/// A remote juggler check, identified by `(host, service)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    #[serde(default, deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aggregator: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aggregator_kwargs: AggregatorArgs,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ttl: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub methods: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<ChildCheck>,
    #[serde(rename = "flaps", default, skip_serializing_if = "Option::is_none")]
    pub flap: Option<FlapConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub namespace: String,
}

/// Reference from an aggregate check to one of its children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildCheck {
    #[serde(default, deserialize_with = "null_as_default")]
    pub instance: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service: String,
}

impl ChildCheck {
    #[must_use]
    pub fn host(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            instance: String::new(),
            host: host.into(),
            kind: CHILD_TYPE.to_string(),
            service: service.into(),
        }
    }
}

/// Decode a checks response and attach flap settings.
///
/// Flap durations are returned at the top level of each check object; they
/// become the check's flap config when any of them is non-zero.
pub fn parse_checks(body: &[u8]) -> Result<HostChecks, serde_json::Error> {
    let mut checks: HostChecks = serde_json::from_slice(body)?;
    let flaps: BTreeMap<String, BTreeMap<String, FlapConfig>> = serde_json::from_slice(body)?;

    for (host, services) in flaps {
        for (service, flap) in services {
            if !flap.is_set() {
                continue;
            }
            if let Some(check) = checks.get_mut(&host).and_then(|s| s.get_mut(&service)) {
                check.flap = Some(flap);
            }
        }
    }
    Ok(checks)
}

#[derive(Debug, Serialize)]
struct EventBatch<'a> {
    source: &'static str,
    events: Vec<BatchEvent<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchEvent<'a> {
    host: &'a str,
    service: &'a str,
    status: &'static str,
    description: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

/// Client for the juggler API of one task.
#[derive(Clone)]
pub struct JugglerApi {
    client: MultiHostClient,
    cache: CheckCache,
    hosts: Arc<[String]>,
    frontend: Arc<[String]>,
    token: Option<String>,
    tags: Arc<[String]>,
}

impl JugglerApi {
    #[must_use]
    pub fn new(client: MultiHostClient, cache: CheckCache, config: &Config) -> Self {
        Self {
            client,
            cache,
            hosts: config.hosts.clone().into(),
            frontend: config.frontend.clone().into(),
            token: config.token().map(str::to_string),
            tags: config.query_tags().into(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &CheckCache {
        &self.cache
    }

    fn checks_query(&self, host: &str) -> String {
        let mut query = String::from("do=1&include_children=true");
        for tag in self.tags.iter() {
            query.push_str("&tag_name=");
            query.push_str(&urlencoding::encode(tag));
        }
        query.push_str("&host_name=");
        query.push_str(&urlencoding::encode(host));
        query
    }

    /// Checks owned by `host`, served from the cache when possible.
    pub async fn get_checks(&self, ctx: &CallContext, host: &str) -> Result<HostChecks, JugglerError> {
        let request = HostRequest::get(format!("{CHECKS_PATH}?{}", self.checks_query(host)));
        let body = self
            .cache
            .get(ctx, host, || {
                let request = &request;
                async move {
                    info!(host = %host, path = %request.path(), "Query checks");
                    let response = self.client.request(ctx, &self.frontend, request).await?;
                    debug!(
                        host = %host,
                        body = %String::from_utf8_lossy(&response.body),
                        "Juggler checks response"
                    );
                    Ok(Arc::<[u8]>::from(response.body))
                }
            })
            .await
            .map_err(|source| JugglerError::Fetch {
                host: host.to_string(),
                source,
            })?;

        parse_checks(&body).map_err(|source| JugglerError::Decode {
            host: host.to_string(),
            source,
        })
    }

    /// Create or replace one check on the write hosts.
    pub async fn update_check(&self, ctx: &CallContext, check: &CheckDefinition) -> Result<(), HttpError> {
        info!(host = %check.host, service = %check.service, "Update check");
        let request = HostRequest::post(UPDATE_CHECK_PATH)
            .json(check)?
            .oauth(self.token.as_deref());
        let response = self.client.request(ctx, &self.hosts, &request).await?;
        info!(
            host = %check.host,
            service = %check.service,
            via = %response.host,
            "Check updated"
        );
        Ok(())
    }

    /// Push the current status of `events` to the frontend hosts.
    pub async fn send_events(&self, ctx: &CallContext, events: &[&Event]) -> Result<(), HttpError> {
        if events.is_empty() {
            return Ok(());
        }
        let batch = EventBatch {
            source: EVENTS_SOURCE,
            events: events
                .iter()
                .map(|e| BatchEvent {
                    host: &e.host,
                    service: &e.service,
                    status: e.level.as_str(),
                    description: &e.description,
                    tags: &self.tags,
                })
                .collect(),
        };
        let request = HostRequest::post(EVENTS_PATH).json(&batch)?;
        let response = self.client.request(ctx, &self.frontend, &request).await?;
        debug!(
            events = events.len(),
            response = %String::from_utf8_lossy(&response.body).trim(),
            "Events sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHECKS: &str = r#"{
        "front": {
            "5xx": {
                "host": "front", "service": "5xx", "ttl": 900,
                "tags": ["combaine", "app"], "methods": ["GOLEM"],
                "children": [{"host": "front1", "type": "HOST", "service": "5xx", "instance": ""}],
                "stable_time": 60, "critical_time": 90,
                "aggregator_kwargs": {"ignore_nodata": 1, "limits": [{"crit": "146%", "day_start": 1}]}
            },
            "4xx": {"host": "front", "service": "4xx", "tags": null, "children": null, "boost_time": 0}
        }
    }"#;

    fn config(server: &MockServer) -> Config {
        Config {
            plugin: "test".into(),
            hosts: vec![server.address().to_string()],
            frontend: vec![server.address().to_string()],
            token: Some("secret".into()),
            ..Config::default()
        }
    }

    #[test]
    fn test_parse_checks_merges_flaps() {
        let checks = parse_checks(CHECKS.as_bytes()).unwrap();
        let front = &checks["front"];
        assert_eq!(front.len(), 2);

        let flap = front["5xx"].flap.unwrap();
        assert_eq!((flap.stable_time, flap.critical_time, flap.boost_time), (60, 90, 0));
        assert_eq!(front["5xx"].children, vec![ChildCheck::host("front1", "5xx")]);
        assert_eq!(front["5xx"].aggregator_kwargs.ignore_nodata, 1);

        assert!(front["4xx"].flap.is_none());
        assert!(front["4xx"].tags.is_empty());
    }

    #[test]
    fn test_parse_checks_reads_null_as_zero() {
        let body = r#"{"back": {"5xx": {
            "host": "back", "service": "5xx", "aggregator_kwargs": {"ignore_nodata": null, "limits": null},
            "children": [{"host": "back1", "service": "5xx", "type": null, "instance": null}],
            "boost_time": null, "stable_time": 30, "critical_time": null
        }}}"#;
        let checks = parse_checks(body.as_bytes()).unwrap();
        let check = &checks["back"]["5xx"];

        assert_eq!(check.children[0].host, "back1");
        assert!(check.children[0].instance.is_empty());
        assert!(check.children[0].kind.is_empty());
        assert_eq!(check.aggregator_kwargs, AggregatorArgs::default());
        let flap = check.flap.unwrap();
        assert_eq!((flap.boost_time, flap.stable_time, flap.critical_time), (0, 30, 0));
    }

    #[test]
    fn test_check_serialization_omits_absent_flaps() {
        let mut check = CheckDefinition {
            host: "front".into(),
            service: "5xx".into(),
            ..CheckDefinition::default()
        };
        let json = serde_json::to_value(&check).unwrap();
        assert!(json.get("flaps").is_none());
        assert!(json["aggregator_kwargs"].get("limits").is_none());

        check.flap = Some(FlapConfig {
            enable: 1,
            stable_time: 60,
            ..FlapConfig::default()
        });
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["flaps"], json!({"boost_time": 0, "stable_time": 60, "critical_time": 0}));
    }

    #[tokio::test]
    async fn test_get_checks_is_cached_per_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CHECKS_PATH))
            .and(query_param("host_name", "front"))
            .and(query_param("tag_name", "combaine"))
            .and(query_param("include_children", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHECKS))
            .expect(1)
            .mount(&server)
            .await;

        let api = JugglerApi::new(MultiHostClient::default(), CheckCache::default(), &config(&server));
        let ctx = CallContext::background();
        let first = api.get_checks(&ctx, "front").await.unwrap();
        let second = api.get_checks(&ctx, "front").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(api.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_get_checks_failure_names_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("broken"))
            .mount(&server)
            .await;

        let api = JugglerApi::new(MultiHostClient::default(), CheckCache::default(), &config(&server));
        let err = api
            .get_checks(&CallContext::background(), "front")
            .await
            .unwrap_err();
        assert!(matches!(err, JugglerError::Fetch { ref host, .. } if host == "front"));
        assert!(api.cache().is_empty());
    }

    #[tokio::test]
    async fn test_update_check_sends_token_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/checks/add_or_update"))
            .and(query_param("do", "1"))
            .and(header("authorization", "OAuth secret"))
            .and(body_partial_json(json!({"host": "front", "service": "5xx", "ttl": 900})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = JugglerApi::new(MultiHostClient::default(), CheckCache::default(), &config(&server));
        let check = CheckDefinition {
            host: "front".into(),
            service: "5xx".into(),
            ttl: 900,
            ..CheckDefinition::default()
        };
        api.update_check(&CallContext::background(), &check).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_events_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(EVENTS_PATH))
            .and(body_partial_json(json!({
                "source": "combaine",
                "events": [{"host": "front1", "service": "5xx", "status": "CRIT", "tags": ["combaine"]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let api = JugglerApi::new(MultiHostClient::default(), CheckCache::default(), &config(&server));
        let event = Event {
            host: "front1".into(),
            service: "5xx".into(),
            description: "too many".into(),
            level: crate::script::Level::Crit,
            tags: BTreeMap::new(),
        };
        api.send_events(&CallContext::background(), &[&event])
            .await
            .unwrap();
    }
}
