//! Juggler sender: plugin run, check reconciliation and event push.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregationResult, CallContext, HttpError, MultiHostClient, Sender};
use tracing::{debug, error, info, warn};

use crate::api::JugglerApi;
use crate::cache::CheckCache;
use crate::config::{Config, DesiredCheck};
use crate::error::{ConfigError, JugglerError};
use crate::reconcile::{self, ReconcileReport};
use crate::script::{self, Event, LuaEngine, ScriptEngine};

/// Per-task delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub total: usize,
    pub failed: usize,
}

impl fmt::Display for SendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send {}/{} events", self.failed, self.total)
    }
}

/// Sends one task's results to juggler.
pub struct JugglerSender {
    id: String,
    config: Arc<Config>,
    desired: DesiredCheck,
    api: JugglerApi,
    engine: Arc<dyn ScriptEngine>,
}

impl JugglerSender {
    /// Build a sender for task `id`. `config` must already be merged with the sender config.
    pub fn new(
        id: impl Into<String>,
        config: Config,
        client: MultiHostClient,
        cache: CheckCache,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let api = JugglerApi::new(client, cache, &config);
        Ok(Self {
            id: id.into(),
            desired: DesiredCheck::from_config(&config),
            config: Arc::new(config),
            api,
            engine: Arc::new(LuaEngine),
        })
    }

    /// Use a different plugin engine.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Target host owning the check of `event`.
    fn target_host<'a>(&'a self, event: &'a Event) -> &'a str {
        self.config
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .or_else(|| event.tag("metahost"))
            .unwrap_or(&event.host)
    }

    /// Run the whole pipeline and report how many events were delivered.
    pub async fn send_results(
        &self,
        ctx: &CallContext,
        data: &[AggregationResult],
    ) -> Result<SendSummary, JugglerError> {
        let id = self.id.as_str();
        info!(task_id = %id, plugin = %self.config.plugin, results = data.len(), "Sending to juggler");

        let events = ctx
            .run(script::evaluate_blocking(
                Arc::clone(&self.engine),
                Arc::clone(&self.config),
                data.into(),
            ))
            .await??;

        let total = events.len();
        if total == 0 {
            info!(task_id = %id, "Plugin produced no events");
            return Ok(SendSummary::default());
        }

        let mut failed = 0;
        for (host, group) in self.group_by_host(&events) {
            failed += self.send_host(ctx, host, &group).await?;
        }

        let summary = SendSummary { total, failed };
        if failed == total {
            error!(task_id = %id, "{summary}");
            return Err(JugglerError::TotalFailure { failed, total });
        }
        if failed > 0 {
            warn!(task_id = %id, "{summary}");
        } else {
            info!(task_id = %id, total, "All events sent");
        }
        Ok(summary)
    }

    /// Events grouped by target host, hosts in first-seen order.
    fn group_by_host<'a>(&'a self, events: &'a [Event]) -> Vec<(&'a str, Vec<&'a Event>)> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<(&str, Vec<&Event>)> = Vec::new();
        for event in events {
            let host = self.target_host(event);
            let slot = *index.entry(host).or_insert_with(|| {
                groups.push((host, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(event);
        }
        groups
    }

    /// Reconcile one host and push its events. Returns the number of failed events.
    async fn send_host(
        &self,
        ctx: &CallContext,
        host: &str,
        events: &[&Event],
    ) -> Result<usize, JugglerError> {
        let id = self.id.as_str();

        let mut checks = match self.api.get_checks(ctx, host).await {
            Ok(checks) => checks,
            Err(err) => {
                if let Some(ctx_err) = err.context_error() {
                    return Err(ctx_err.into());
                }
                error!(task_id = %id, host = %host, error = %err, "Failed to get checks");
                return Ok(events.len());
            }
        };
        let services = checks.remove(host).unwrap_or_else(|| {
            debug!(task_id = %id, host = %host, "Create new checks");
            BTreeMap::new()
        });

        let pending = reconcile::plan(&self.desired, host, services, events);
        let report = reconcile::apply(&self.api, ctx, host, pending).await?;
        log_report(id, &report);

        let (in_sync, out_of_sync): (Vec<&Event>, Vec<&Event>) = events
            .iter()
            .partition(|event| report.is_in_sync(&event.service));
        let mut failed = out_of_sync.len();

        match self.api.send_events(ctx, &in_sync).await {
            Ok(()) => {}
            Err(HttpError::Cancelled(err)) => return Err(err.into()),
            Err(err) => {
                error!(task_id = %id, host = %host, error = %err, "Failed to send events");
                failed += in_sync.len();
            }
        }
        Ok(failed)
    }
}

fn log_report(id: &str, report: &ReconcileReport) {
    if !report.updated.is_empty() {
        info!(task_id = %id, host = %report.host, services = ?report.updated, "Checks updated");
    }
    for (service, err) in &report.failed {
        warn!(task_id = %id, host = %report.host, service = %service, error = %err, "Check left outdated");
    }
}

#[async_trait]
impl Sender for JugglerSender {
    fn name(&self) -> &'static str {
        "juggler"
    }

    async fn send(&self, ctx: &CallContext, data: &[AggregationResult]) -> anyhow::Result<()> {
        self.send_results(ctx, data).await?;
        Ok(())
    }
}
