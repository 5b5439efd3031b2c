//! Conversion of aggregation data and configuration into script values.
//!
//! Payload results are dumped in [`DumpMode::Numeric`]: every leaf must be a
//! number or a string that parses as one. Configuration is dumped in
//! [`DumpMode::Generic`], where scalars keep their type.

use std::collections::BTreeMap;

use common::{AggregationResult, Value};

use super::{ScriptTable, ScriptValue};
use crate::error::ScriptError;

/// How scalar leaves are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// Numbers only; strings are parsed
    Numeric,
    /// Numbers, strings and booleans as they are
    Generic,
}

/// Recursively convert `value` into a script value.
#[allow(clippy::cast_precision_loss)]
pub fn dump(value: &Value, mode: DumpMode) -> Result<ScriptValue, ScriptError> {
    match value {
        Value::Seq(items) => Ok(ScriptValue::Table(ScriptTable {
            seq: items
                .iter()
                .map(|item| dump(item, mode))
                .collect::<Result<_, _>>()?,
            fields: BTreeMap::new(),
        })),
        Value::Map(map) => Ok(ScriptValue::Table(ScriptTable {
            seq: Vec::new(),
            fields: map
                .iter()
                .map(|(k, v)| Ok((k.clone(), dump(v, mode)?)))
                .collect::<Result<_, ScriptError>>()?,
        })),
        Value::Int(v) => Ok(ScriptValue::Number(*v as f64)),
        Value::UInt(v) => Ok(ScriptValue::Number(*v as f64)),
        Value::Float(v) => Ok(ScriptValue::Number(*v)),
        Value::Bytes(bytes) => dump_text(&String::from_utf8_lossy(bytes), mode),
        Value::Str(s) => dump_text(s, mode),
        Value::Bool(b) => match mode {
            DumpMode::Generic => Ok(ScriptValue::Bool(*b)),
            DumpMode::Numeric => Err(ScriptError::Marshal(format!("value {b} is not a number"))),
        },
    }
}

fn dump_text(text: &str, mode: DumpMode) -> Result<ScriptValue, ScriptError> {
    match mode {
        DumpMode::Generic => Ok(ScriptValue::String(text.to_string())),
        DumpMode::Numeric => text
            .trim()
            .parse()
            .map(ScriptValue::Number)
            .map_err(|_| ScriptError::Marshal(format!("value {text:?} is not a number"))),
    }
}

/// The `payload` global: a sequence of `{Tags = {...}, Result = ...}` records.
pub fn payload(data: &[&AggregationResult]) -> Result<ScriptValue, ScriptError> {
    let seq = data
        .iter()
        .map(|item| {
            let mut record = ScriptTable::default();
            record.insert("Tags", string_map(&item.tags));
            record.insert("Result", dump(&item.result, DumpMode::Numeric)?);
            Ok(ScriptValue::Table(record))
        })
        .collect::<Result<_, ScriptError>>()?;
    Ok(ScriptValue::Table(ScriptTable {
        seq,
        fields: BTreeMap::new(),
    }))
}

/// The `config` global.
pub fn plugin_config(config: &BTreeMap<String, Value>) -> Result<ScriptValue, ScriptError> {
    dump(&Value::Map(config.clone()), DumpMode::Generic)
}

#[must_use]
pub fn string_map(map: &BTreeMap<String, String>) -> ScriptValue {
    ScriptValue::Table(ScriptTable {
        seq: Vec::new(),
        fields: map
            .iter()
            .map(|(k, v)| (k.clone(), ScriptValue::String(v.clone())))
            .collect(),
    })
}

/// The `conditions` global: condition lists keyed by level name.
#[must_use]
pub fn conditions(levels: &BTreeMap<&'static str, &[String]>) -> ScriptValue {
    let fields = levels
        .iter()
        .map(|(level, conditions)| {
            let list = ScriptTable {
                seq: conditions
                    .iter()
                    .map(|c| ScriptValue::String(c.clone()))
                    .collect(),
                fields: BTreeMap::new(),
            };
            ((*level).to_string(), ScriptValue::Table(list))
        })
        .collect();
    ScriptValue::Table(ScriptTable {
        seq: Vec::new(),
        fields,
    })
}
