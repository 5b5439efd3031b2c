//! Juggler sender for combaine.
//!
//! A task's aggregation results are handed to a Lua plugin that decides the
//! status of every check. The sender then makes sure each check exists in
//! juggler with the configured attributes and pushes the events.
//!
//! ```text
//! SenderTask ─► script::evaluate ─► [Event]
//!                                      │ grouped by target host
//!                                      ▼
//!               JugglerApi::get_checks (TtlCache, single-flight)
//!                                      │
//!                                      ▼
//!               reconcile::plan ─► reconcile::apply ─► JugglerApi::send_events
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod script;
pub mod sender;

pub use api::{CheckDefinition, ChildCheck, HostChecks, JugglerApi};
pub use cache::{CacheSettings, CheckCache, TtlCache};
pub use config::{Config, DesiredCheck, FlapConfig, SenderConfig};
pub use error::{ConfigError, JugglerError, ScriptError};
pub use script::{Event, Level, LuaEngine, ScriptEngine};
pub use sender::{JugglerSender, SendSummary};
