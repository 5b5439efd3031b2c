//! Sender-wide and per-task configuration.
//!
//! [`SenderConfig`] is read once at startup from YAML. Each task carries its
//! own [`Config`]; [`Config::apply_sender_config`] fills the gaps from the
//! sender config and validates the result, and [`DesiredCheck::from_config`]
//! resolves every check default in one place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{AggregationResult, Value};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::cache::CacheSettings;
use crate::error::ConfigError;

/// Environment variable naming the sender config file.
pub const CONFIG_ENV: &str = "JUGGLER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/combaine/juggler.yaml";
pub const DEFAULT_PLUGINS_DIR: &str = "/etc/combaine/juggler/plugins";

/// Tag attached to every managed check and used to query them.
pub const DEFAULT_TAG: &str = "combaine";
pub const DEFAULT_NAMESPACE: &str = "combaine";
pub const DEFAULT_METHOD: &str = "GOLEM";
/// Check ttl in seconds.
pub const DEFAULT_TTL: u32 = 900;

/// Sender-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Hosts accepting check updates
    pub hosts: Vec<String>,
    /// Hosts serving check reads and events; defaults to `hosts`
    pub frontend: Vec<String>,
    pub plugins_dir: PathBuf,
    pub token: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_clean_interval_secs: u64,
    /// Deadline for one task
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            frontend: Vec::new(),
            plugins_dir: PathBuf::from(DEFAULT_PLUGINS_DIR),
            token: None,
            cache_ttl_secs: 60,
            cache_clean_interval_secs: 300,
            timeout_secs: 30,
        }
    }
}

impl SenderConfig {
    /// Load from `$JUGGLER_CONFIG`, falling back to the default path.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(Path::new(&path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        if config.frontend.is_empty() {
            config.frontend.clone_from(&config.hosts);
        }
        info!(path = %path.display(), hosts = ?config.hosts, "Loaded juggler sender config");
        Ok(config)
    }

    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            interval: Duration::from_secs(self.cache_clean_interval_secs),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Flap detection settings of a check.
///
/// `enable` is a local switch; the juggler API neither returns nor accepts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlapConfig {
    #[serde(default, skip_serializing, deserialize_with = "null_as_default")]
    pub enable: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub boost_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stable_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub critical_time: i64,
}

impl FlapConfig {
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enable == 1
    }

    /// Whether any duration is set.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.boost_time != 0 || self.stable_time != 0 || self.critical_time != 0
    }
}

/// Decode `null` as the type's zero value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Aggregator arguments of a check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatorArgs {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ignore_nodata: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub limits: Vec<BTreeMap<String, Value>>,
}

/// Per-task configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lua plugin name, without extension
    pub plugin: String,
    pub plugins_dir: Option<PathBuf>,
    pub hosts: Vec<String>,
    pub frontend: Vec<String>,
    pub token: Option<String>,
    /// Check-owning host; when unset it is taken from each event
    pub host: Option<String>,
    pub check_name: String,
    pub description: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub methods: Vec<String>,
    /// Comma-separated methods, used when `methods` is empty
    pub method: String,
    pub aggregator: String,
    pub aggregator_kwargs: AggregatorArgs,
    pub ttl: u32,
    pub flap: Option<FlapConfig>,
    /// Per-service flap overrides
    pub checks_options: BTreeMap<String, FlapConfig>,
    pub variables: BTreeMap<String, String>,
    #[serde(rename = "OK")]
    pub ok: Option<Vec<String>>,
    #[serde(rename = "INFO")]
    pub info: Option<Vec<String>>,
    #[serde(rename = "WARN")]
    pub warn: Option<Vec<String>>,
    #[serde(rename = "CRIT")]
    pub crit: Option<Vec<String>>,
    /// Free-form plugin configuration
    pub config: BTreeMap<String, Value>,
    /// Aggregate names exposed to the plugin; empty means all
    pub items: Vec<String>,
}

impl Config {
    /// Fill unset options from `sender` and validate.
    pub fn apply_sender_config(&mut self, sender: &SenderConfig) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            self.hosts.clone_from(&sender.hosts);
        }
        if self.frontend.is_empty() {
            self.frontend = if sender.frontend.is_empty() {
                self.hosts.clone()
            } else {
                sender.frontend.clone()
            };
        }
        if self.plugins_dir.is_none() {
            self.plugins_dir = Some(sender.plugins_dir.clone());
        }
        if self.token().is_none() {
            self.token.clone_from(&sender.token);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin.is_empty() {
            return Err(ConfigError::Missing("plugin"));
        }
        if self.hosts.is_empty() {
            return Err(ConfigError::Missing("hosts"));
        }
        if self.frontend.is_empty() {
            return Err(ConfigError::Missing("frontend"));
        }
        Ok(())
    }

    /// Auth token, if a non-empty one is configured.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn plugins_dir(&self) -> &Path {
        self.plugins_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_PLUGINS_DIR))
    }

    /// Tags used both to query checks and to label them.
    #[must_use]
    pub fn query_tags(&self) -> Vec<String> {
        if self.tags.is_empty() {
            vec![DEFAULT_TAG.to_string()]
        } else {
            self.tags.clone()
        }
    }

    /// Condition lists by level, only for the levels that are configured.
    #[must_use]
    pub fn conditions(&self) -> BTreeMap<&'static str, &[String]> {
        [
            ("OK", &self.ok),
            ("INFO", &self.info),
            ("WARN", &self.warn),
            ("CRIT", &self.crit),
        ]
        .into_iter()
        .filter_map(|(level, cond)| cond.as_deref().map(|c| (level, c)))
        .collect()
    }

    /// Results whose `aggregate` tag is listed in `items`.
    #[must_use]
    pub fn select<'a>(&self, data: &'a [AggregationResult]) -> Vec<&'a AggregationResult> {
        let selected: Vec<_> = data
            .iter()
            .filter(|r| {
                self.items.is_empty()
                    || r.tag("aggregate")
                        .is_some_and(|agg| self.items.iter().any(|item| item == agg))
            })
            .collect();
        debug!(selected = selected.len(), total = data.len(), "Selected plugin payload");
        selected
    }
}

/// Check attributes a task wants, with every default resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredCheck {
    pub ttl: u32,
    pub aggregator: String,
    pub aggregator_kwargs: AggregatorArgs,
    pub methods: Vec<String>,
    pub flap: Option<FlapConfig>,
    pub checks_options: BTreeMap<String, FlapConfig>,
    pub tags: Vec<String>,
    pub description: String,
    /// Enforced only when an auth token is configured
    pub namespace: Option<String>,
}

impl DesiredCheck {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let methods = if !config.methods.is_empty() {
            config.methods.clone()
        } else if !config.method.is_empty() {
            config.method.split(',').map(str::to_string).collect()
        } else {
            vec![DEFAULT_METHOD.to_string()]
        };

        let description = if config.description.is_empty() {
            config.check_name.clone()
        } else {
            config.description.clone()
        };

        let namespace = config.token().map(|_| {
            if config.namespace.is_empty() {
                DEFAULT_NAMESPACE.to_string()
            } else {
                config.namespace.clone()
            }
        });

        Self {
            ttl: if config.ttl == 0 { DEFAULT_TTL } else { config.ttl },
            aggregator: config.aggregator.clone(),
            aggregator_kwargs: config.aggregator_kwargs.clone(),
            methods,
            flap: config.flap,
            checks_options: config.checks_options.clone(),
            tags: config.query_tags(),
            description,
            namespace,
        }
    }
}
