//! Repacking of aggregation results into agave point strings, by subgroup.

use std::collections::BTreeMap;

use common::{subgroup_name, AggregationResult, Value};
use tracing::{debug, error};

use crate::config::AgaveConfig;

/// Point strings by subgroup, e.g. `front -> ["5xx:1", "2xx:10+3xx:2"]`.
pub type Repacked = BTreeMap<String, Vec<String>>;

/// Group the configured items of `data` into point strings.
///
/// Results that cannot be represented are logged and skipped.
#[must_use]
pub fn repack(id: &str, config: &AgaveConfig, data: &[AggregationResult]) -> Repacked {
    let items = config.query_items();
    let mut repacked = Repacked::new();

    for item in data {
        let Some(root) = item.tag("aggregate") else {
            error!(task_id = %id, tags = ?item.tags, "Failed to get data tag 'aggregate', skip result");
            continue;
        };
        let Some(metrics) = items.get(root) else {
            debug!(task_id = %id, aggregate = %root, "Not in items, skip result");
            continue;
        };
        let subgroup = match subgroup_name(&item.tags) {
            Ok(subgroup) => subgroup,
            Err(err) => {
                error!(task_id = %id, error = %err, "Skip result");
                continue;
            }
        };

        let points = points(id, config, root, metrics, &item.result);
        if !points.is_empty() {
            repacked.entry(subgroup).or_default().extend(points);
        }
    }
    repacked
}

fn points(id: &str, config: &AgaveConfig, root: &str, metrics: &[&str], result: &Value) -> Vec<String> {
    match result {
        Value::Seq(values) => {
            if !metrics.is_empty() {
                return Vec::new();
            }
            join_fields(id, &config.fields, values).into_iter().collect()
        }
        Value::Map(map) => metrics
            .iter()
            .filter_map(|metric| match map.get(*metric)? {
                Value::Seq(values) => join_fields(id, &config.fields, values),
                Value::Map(_) => {
                    debug!(task_id = %id, metric = %metric, "Nested maps are not supported");
                    None
                }
                scalar => Some(format!("{metric}:{scalar}")),
            })
            .collect(),
        scalar => vec![format!("{root}:{scalar}")],
    }
}

/// `f1:v1+f2:v2...`, when there is one field per value.
fn join_fields(id: &str, fields: &[String], values: &[Value]) -> Option<String> {
    if fields.is_empty() || fields.len() != values.len() {
        error!(
            task_id = %id,
            fields = fields.len(),
            values = values.len(),
            "Unable to send a list, fields do not match values"
        );
        return None;
    }
    let joined = fields
        .iter()
        .zip(values)
        .map(|(field, value)| format!("{field}:{value}"))
        .collect::<Vec<_>>()
        .join("+");
    Some(joined)
}
