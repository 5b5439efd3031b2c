//! Agave task configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AgaveError;

/// Per-task agave configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgaveConfig {
    /// `aggregate` or `aggregate.metric` entries to send
    pub items: Vec<String>,
    pub hosts: Vec<String>,
    pub graph_name: String,
    pub graph_template: String,
    /// Names of the positions of list results
    #[serde(rename = "Fields", alias = "fields")]
    pub fields: Vec<String>,
    pub step: i64,
}

impl AgaveConfig {
    pub fn validate(&self) -> Result<(), AgaveError> {
        if self.hosts.is_empty() {
            return Err(AgaveError::Missing("hosts"));
        }
        if self.graph_name.is_empty() {
            return Err(AgaveError::Missing("graph_name"));
        }
        Ok(())
    }

    /// Metric names wanted per aggregate; an empty list selects the whole result.
    #[must_use]
    pub fn query_items(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut items: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for item in &self.items {
            match item.split_once('.') {
                Some((aggregate, metric)) => items.entry(aggregate).or_default().push(metric),
                None => {
                    items.entry(item.as_str()).or_default();
                }
            }
        }
        items
    }
}
