//! Lua implementation of the plugin engine.

use mlua::{Lua, LuaOptions, StdLib, Table, Value as LuaValue};
use tracing::{debug, error, info, warn};

use super::{ScriptEngine, ScriptHandle, ScriptTable, ScriptValue};
use crate::error::ScriptError;

/// Deepest table nesting converted in either direction.
const MAX_DEPTH: usize = 64;

/// Standard libraries opened for plugins. No `io` and no `debug`.
fn plugin_libs() -> StdLib {
    StdLib::COROUTINE
        | StdLib::TABLE
        | StdLib::OS
        | StdLib::STRING
        | StdLib::UTF8
        | StdLib::MATH
        | StdLib::PACKAGE
}

/// `os` functions that could end or alter the sender process.
const BLOCKED_OS: [&str; 5] = ["exit", "execute", "remove", "rename", "tmpname"];

/// Engine creating one Lua 5.4 state per plugin load.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaEngine;

impl ScriptEngine for LuaEngine {
    fn extension(&self) -> &'static str {
        "lua"
    }

    fn load(&self, name: &str, source: &str) -> Result<Box<dyn ScriptHandle>, ScriptError> {
        let lua = Lua::new_with(plugin_libs(), LuaOptions::default())
            .map_err(|e| ScriptError::Load(e.to_string()))?;
        restrict_os(&lua).map_err(|e| ScriptError::Load(e.to_string()))?;
        preload_tools(&lua, name).map_err(|e| ScriptError::Load(e.to_string()))?;
        lua.load(source)
            .set_name(format!("@{name}.lua"))
            .exec()
            .map_err(|e| ScriptError::Load(e.to_string()))?;
        Ok(Box::new(LuaHandle { lua }))
    }
}

fn restrict_os(lua: &Lua) -> mlua::Result<()> {
    let os: Table = lua.globals().get("os")?;
    for name in BLOCKED_OS {
        os.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

/// Register the `log` table plugins use to write into the sender log.
fn preload_tools(lua: &Lua, plugin: &str) -> mlua::Result<()> {
    let log = lua.create_table()?;
    let plugin = plugin.to_string();

    macro_rules! log_fn {
        ($name:literal, $level:ident) => {{
            let plugin = plugin.clone();
            log.set(
                $name,
                lua.create_function(move |_, msg: String| {
                    $level!(plugin = %plugin, "{msg}");
                    Ok(())
                })?,
            )?;
        }};
    }
    log_fn!("debug", debug);
    log_fn!("info", info);
    log_fn!("warn", warn);
    log_fn!("error", error);

    lua.globals().set("log", log)
}

struct LuaHandle {
    lua: Lua,
}

impl ScriptHandle for LuaHandle {
    fn set_global(&mut self, name: &str, value: &ScriptValue) -> Result<(), ScriptError> {
        let value = to_lua(&self.lua, value, 0).map_err(|e| ScriptError::Marshal(e.to_string()))?;
        self.lua
            .globals()
            .set(name, value)
            .map_err(|e| ScriptError::Marshal(e.to_string()))
    }

    fn call(&mut self, function: &str) -> Result<ScriptValue, ScriptError> {
        let result = match self.lua.globals().get::<LuaValue>(function) {
            Ok(LuaValue::Function(f)) => f.call::<LuaValue>(()),
            Ok(other) => {
                return Err(ScriptError::Execution(format!(
                    "attempt to call a {} value (global '{function}')",
                    other.type_name()
                )))
            }
            Err(e) => Err(e),
        }
        .map_err(|e| ScriptError::Execution(e.to_string()))?;
        debug!(function = %function, "Plugin function returned");
        from_lua(result, 0)
    }
}

fn to_lua(lua: &Lua, value: &ScriptValue, depth: usize) -> mlua::Result<LuaValue> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime("table nesting too deep"));
    }
    Ok(match value {
        ScriptValue::Nil => LuaValue::Nil,
        ScriptValue::Bool(b) => LuaValue::Boolean(*b),
        ScriptValue::Number(n) => LuaValue::Number(*n),
        ScriptValue::String(s) => LuaValue::String(lua.create_string(s)?),
        ScriptValue::Table(table) => {
            let out = lua.create_table()?;
            for (i, item) in table.seq.iter().enumerate() {
                out.raw_set(i + 1, to_lua(lua, item, depth + 1)?)?;
            }
            for (key, item) in &table.fields {
                out.raw_set(key.as_str(), to_lua(lua, item, depth + 1)?)?;
            }
            LuaValue::Table(out)
        }
    })
}

#[allow(clippy::cast_precision_loss)]
fn from_lua(value: LuaValue, depth: usize) -> Result<ScriptValue, ScriptError> {
    Ok(match value {
        LuaValue::Nil => ScriptValue::Nil,
        LuaValue::Boolean(b) => ScriptValue::Bool(b),
        LuaValue::Integer(i) => ScriptValue::Number(i as f64),
        LuaValue::Number(n) => ScriptValue::Number(n),
        LuaValue::String(s) => ScriptValue::String(s.to_string_lossy().to_string()),
        LuaValue::Table(table) => ScriptValue::Table(table_from_lua(&table, depth)?),
        other => ScriptValue::String(other.type_name().to_string()),
    })
}

fn table_from_lua(table: &Table, depth: usize) -> Result<ScriptTable, ScriptError> {
    if depth >= MAX_DEPTH {
        return Err(ScriptError::Marshal(format!(
            "plugin result nested deeper than {MAX_DEPTH} tables"
        )));
    }
    let marshal = |e: mlua::Error| ScriptError::Marshal(e.to_string());

    let len = table.raw_len();
    let mut out = ScriptTable::default();
    for i in 1..=len {
        let item = table.raw_get::<LuaValue>(i).map_err(marshal)?;
        out.seq.push(from_lua(item, depth + 1)?);
    }

    for pair in table.clone().pairs::<LuaValue, LuaValue>() {
        let (key, item) = pair.map_err(marshal)?;
        if is_sequence_key(&key, len) {
            continue;
        }
        out.fields
            .insert(key_to_string(&key), from_lua(item, depth + 1)?);
    }
    Ok(out)
}

#[allow(clippy::cast_possible_wrap, clippy::float_cmp, clippy::cast_precision_loss)]
fn is_sequence_key(key: &LuaValue, len: usize) -> bool {
    match key {
        LuaValue::Integer(i) => (1..=len as i64).contains(i),
        LuaValue::Number(n) => n.fract() == 0.0 && *n >= 1.0 && *n <= len as f64,
        _ => false,
    }
}

fn key_to_string(key: &LuaValue) -> String {
    match key {
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        other => other.type_name().to_string(),
    }
}
