//! Agave sender: one graph update request per subgroup, sent in parallel.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use common::{AggregationResult, CallContext, HostRequest, HttpError, MultiHostClient, Sender};
use futures::future::join_all;
use reqwest::header::{CONNECTION, TE, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::AgaveConfig;
use crate::error::AgaveError;
use crate::repack::repack;

const USER_AGENT_VALUE: &str = "Yandex/CombaineClient";

/// Sends a task's points to the agave hosts.
pub struct AgaveSender {
    id: String,
    config: AgaveConfig,
    client: MultiHostClient,
}

impl AgaveSender {
    pub fn new(
        id: impl Into<String>,
        config: AgaveConfig,
        client: MultiHostClient,
    ) -> Result<Self, AgaveError> {
        config.validate()?;
        let id = id.into();
        debug!(task_id = %id, config = ?config, "Agave sender");
        Ok(Self { id, config, client })
    }

    /// Path and query of the graph update for `subgroup`.
    fn update_path(&self, subgroup: &str, values: &str, ts: u64) -> String {
        let graph = urlencoding::encode(&self.config.graph_name);
        format!(
            "/api/update/{subgroup}/{graph}?values={values}&ts={ts}&template={template}&title={graph}&step={step}",
            subgroup = urlencoding::encode(subgroup),
            template = urlencoding::encode(&self.config.graph_template),
            step = self.config.step,
        )
    }

    fn request(&self, subgroup: &str, values: &str, ts: u64) -> HostRequest {
        HostRequest::get(self.update_path(subgroup, values, ts))
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(CONNECTION, "TE")
            .header(TE, "deflate, gzip;q=0.3")
    }

    /// Send every subgroup and return how many host attempts failed.
    pub async fn send_points(
        &self,
        ctx: &CallContext,
        data: &[AggregationResult],
    ) -> Result<usize, AgaveError> {
        let id = self.id.as_str();
        let repacked = repack(id, &self.config, data);
        if repacked.is_empty() {
            info!(task_id = %id, "Nothing to send");
            return Ok(0);
        }

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let sends = repacked.iter().map(|(subgroup, points)| {
            let request = self.request(subgroup, &points.join("+"), ts);
            async move {
                debug!(task_id = %id, path = %request.path(), "Send points");
                (subgroup, self.client.request(ctx, &self.config.hosts, &request).await)
            }
        });

        let mut errors = Vec::new();
        for (subgroup, result) in join_all(sends).await {
            let failures = match result {
                Ok(response) => {
                    info!(
                        task_id = %id,
                        subgroup = %subgroup,
                        host = %response.host,
                        status = %response.status,
                        "Points sent"
                    );
                    response.failures
                }
                Err(HttpError::Cancelled(err)) => return Err(err.into()),
                Err(HttpError::AllHostsFailed(failures)) => failures,
                Err(err) => {
                    errors.push(err.to_string());
                    continue;
                }
            };
            for failure in failures {
                warn!(task_id = %id, subgroup = %subgroup, host = %failure.host, reason = %failure.reason, "Agave update failed");
                errors.push(failure.to_string());
            }
        }

        let total = repacked.len() * self.config.hosts.len();
        let failed = errors.len();
        if failed >= total {
            errors.sort();
            errors.dedup();
            return Err(AgaveError::TotalFailure {
                failed,
                total,
                errors,
            });
        }
        if failed > 0 {
            warn!(task_id = %id, "Failed to send {failed}/{total} points");
        }
        Ok(failed)
    }
}

#[async_trait]
impl Sender for AgaveSender {
    fn name(&self) -> &'static str {
        "agave"
    }

    async fn send(&self, ctx: &CallContext, data: &[AggregationResult]) -> anyhow::Result<()> {
        self.send_points(ctx, data).await?;
        Ok(())
    }
}
