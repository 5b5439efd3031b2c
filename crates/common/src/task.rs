//! Task envelope delivered to senders by the dispatch layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::value::Value;

/// One aggregated snapshot: identifying tags plus the aggregated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    #[serde(rename = "Tags", alias = "tags", default)]
    pub tags: BTreeMap<String, String>,
    #[serde(rename = "Result", alias = "result")]
    pub result: Value,
}

impl AggregationResult {
    #[must_use]
    pub fn new<I, K, V>(tags: I, result: impl Into<Value>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            result: result.into(),
        }
    }

    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// A sender task: opaque id, results and sender-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderTask<C> {
    #[serde(rename = "Id", alias = "id", default)]
    pub id: String,
    #[serde(rename = "Data", alias = "data", default)]
    pub data: Vec<AggregationResult>,
    #[serde(rename = "Config", alias = "config")]
    pub config: C,
}

/// Name of the graph subgroup a result belongs to.
///
/// Metahost results are grouped under their own name; everything else is
/// grouped as `<metahost>-<name>`.
pub fn subgroup_name(tags: &BTreeMap<String, String>) -> Result<String, TaskError> {
    let get = |tag: &'static str| {
        tags.get(tag).ok_or_else(|| TaskError::MissingTag {
            tag,
            tags: format!("{tags:?}"),
        })
    };

    let name = get("name")?;
    if get("type")? == "metahost" {
        return Ok(name.clone());
    }
    Ok(format!("{}-{}", get("metahost")?, name))
}
