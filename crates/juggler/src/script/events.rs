//! Decoding of plugin results into juggler events.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ScriptTable, ScriptValue};
use crate::error::ScriptError;

const UNKNOWN_ENTITY: &str = "UnknownEntity";
const UNKNOWN_SERVICE: &str = "UnknownService";
const NO_DESCRIPTION: &str = "no trigger description";

/// Event status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[default]
    Ok,
    Info,
    Warn,
    Crit,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Crit => "CRIT",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "CRIT" => Ok(Self::Crit),
            other => Err(format!("unknown level '{other}'")),
        }
    }
}

/// One candidate event produced by a plugin run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub host: String,
    pub service: String,
    pub description: String,
    pub level: Level,
    /// Always contains `type`
    pub tags: BTreeMap<String, String>,
}

impl Event {
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// Validate a plugin result table and convert every item into an [`Event`].
///
/// All items are checked; if any is malformed the decode fails with the
/// sorted, de-duplicated list of problems.
pub fn decode(result: &ScriptValue) -> Result<Vec<Event>, ScriptError> {
    let Some(table) = result.as_table() else {
        return Err(ScriptError::Validation(vec![
            "plugin result is not a table".to_string(),
        ]));
    };

    let mut errors = BTreeSet::new();
    let mut events = Vec::new();
    for (key, item) in table.entries() {
        match decode_item(&key, item) {
            Ok(event) => events.push(event),
            Err(message) => {
                errors.insert(message);
            }
        }
    }

    if errors.is_empty() {
        Ok(events)
    } else {
        Err(ScriptError::Validation(errors.into_iter().collect()))
    }
}

fn decode_item(key: &str, item: &ScriptValue) -> Result<Event, String> {
    let Some(item) = item.as_table() else {
        return Err(format!("result[{key}] is not a table"));
    };
    let Some(raw_tags) = item.get("tags").and_then(ScriptValue::as_table) else {
        return Err(format!("missing tags in result[{key}]"));
    };

    let tags: BTreeMap<String, String> = raw_tags
        .entries()
        .filter_map(|(k, v)| v.as_text().map(|v| (k, v)))
        .collect();
    let entity = tags.get("name").map_or(UNKNOWN_ENTITY, String::as_str);

    if !tags.contains_key("type") {
        return Err(format!("Missing tag type for {entity}"));
    }
    let host = text_field(item, "host")
        .or_else(|| tags.get("name").filter(|n| !n.is_empty()).cloned())
        .ok_or_else(|| format!("Missing host for {entity}"))?;

    let service = text_field(item, "service").unwrap_or_else(|| UNKNOWN_SERVICE.to_string());
    let mut description =
        text_field(item, "description").unwrap_or_else(|| NO_DESCRIPTION.to_string());

    let level = match text_field(item, "level").map(|l| l.parse::<Level>()) {
        Some(Ok(level)) => level,
        Some(Err(reason)) => {
            warn!(host = %host, service = %service, reason = %reason, "Forcing event level to OK");
            description.push_str(" (force OK)");
            Level::Ok
        }
        None => {
            warn!(host = %host, service = %service, "Missing level in plugin result, forcing OK");
            description.push_str(" (force OK)");
            Level::Ok
        }
    };

    Ok(Event {
        host,
        service,
        description,
        level,
        tags,
    })
}

/// Non-empty text of a scalar field.
fn text_field(table: &ScriptTable, name: &str) -> Option<String> {
    table
        .get(name)
        .and_then(ScriptValue::as_text)
        .filter(|s| !s.is_empty())
}
