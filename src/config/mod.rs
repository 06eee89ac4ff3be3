//! Store configuration: connections, index families and tunables.
//!
//! Read from the global file (`$XDG_CONFIG_HOME/shardex/config.json` or
//! `~/.config/shardex/config.json`) merged with a project-local
//! `.shardex/config.json`; local values win.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::http::{ClientOptions, DEFAULT_TIMEOUT};
use crate::router::IndexIdentity;
use crate::session::SessionSettings;
use crate::span::SpanType;

pub const CONFIG_DIR_NAME: &str = "shardex";
pub const LOCAL_DIR_NAME: &str = ".shardex";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectionConfig {
    /// Base url of the store.
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    /// `[user, password]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usr: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Connections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(flatten)]
    pub named: BTreeMap<String, ConnectionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub stub: String,
    #[serde(default)]
    pub span_type: SpanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_field: Option<String>,
    /// Refresh interval restored after bulk loads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub connection: Connections,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub indexes: BTreeMap<String, IndexConfig>,
    /// Scroll keep-alive as a store time value (`10s`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buckets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_bulk: Option<usize>,
    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoreConfig {
    /// Field-wise merge; values set in `other` take precedence.
    pub fn merge(&self, other: &StoreConfig) -> StoreConfig {
        let mut named = self.connection.named.clone();
        named.extend(other.connection.named.clone());
        let mut indexes = self.indexes.clone();
        indexes.extend(other.indexes.clone());
        let mut headers = self.headers.clone();
        headers.extend(other.headers.clone());
        let mut extra = self.extra.clone();
        extra.extend(other.extra.clone());

        StoreConfig {
            connection: Connections {
                current: other
                    .connection
                    .current
                    .clone()
                    .or_else(|| self.connection.current.clone()),
                named,
            },
            prefix: other.prefix.clone().or_else(|| self.prefix.clone()),
            source: other.source.clone().or_else(|| self.source.clone()),
            indexes,
            keep: other.keep.clone().or_else(|| self.keep.clone()),
            scroll_size: other.scroll_size.or(self.scroll_size),
            max_buckets: other.max_buckets.or(self.max_buckets),
            index_bulk: other.index_bulk.or(self.index_bulk),
            timeout: other.timeout.or(self.timeout),
            headers,
            extra,
        }
    }

    /// The connection named `name`, or the current one.
    pub fn connection(&self, name: Option<&str>) -> Result<(&str, &ConnectionConfig)> {
        let name = name
            .or(self.connection.current.as_deref())
            .or_else(|| match self.connection.named.len() {
                1 => self.connection.named.keys().next().map(String::as_str),
                _ => None,
            })
            .ok_or_else(|| StoreError::Configuration("no connection selected".to_string()))?;
        self.connection
            .named
            .get_key_value(name)
            .map(|(name, connection)| (name.as_str(), connection))
            .ok_or_else(|| StoreError::Configuration(format!("unknown connection '{name}'")))
    }

    pub fn client_options(&self, connection: Option<&str>) -> Result<ClientOptions> {
        let (_, connection) = self.connection(connection)?;
        Ok(ClientOptions {
            base_url: connection.client.clone(),
            credentials: connection.usr.clone(),
            ca_cert: connection.cert.clone(),
            timeout: self.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT),
            headers: self.headers.clone(),
        })
    }

    /// Identity of the index family `key`, for `source` or the configured
    /// default source.
    pub fn identity(&self, key: &str, source: Option<&str>) -> Result<IndexIdentity> {
        let index = self.indexes.get(key).ok_or_else(|| {
            StoreError::Configuration(format!(
                "unknown index key '{key}' (configured: {})",
                self.indexes.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let prefix = self
            .prefix
            .as_deref()
            .ok_or_else(|| StoreError::Configuration("prefix is not configured".to_string()))?;
        let source = source
            .or(self.source.as_deref())
            .ok_or_else(|| StoreError::Configuration("source is not configured".to_string()))?;
        IndexIdentity::new(prefix, &index.stub, source, index.span_type, index.date_field.clone())
    }

    pub fn session_settings(&self, key: Option<&str>) -> Result<SessionSettings> {
        let defaults = SessionSettings::default();
        let refresh_interval = key
            .and_then(|key| self.indexes.get(key))
            .and_then(|index| index.refresh.clone())
            .unwrap_or(defaults.refresh_interval);
        let settings = SessionSettings {
            scroll_size: self.scroll_size.unwrap_or(defaults.scroll_size),
            keep_alive: match self.keep.as_deref() {
                Some(keep) => parse_time_value(keep)?,
                None => defaults.keep_alive,
            },
            bulk_size: self.index_bulk.unwrap_or(defaults.bulk_size),
            max_buckets: self.max_buckets.unwrap_or(defaults.max_buckets),
            refresh_interval,
        };
        if settings.scroll_size == 0 || settings.bulk_size == 0 {
            return Err(StoreError::Configuration(
                "scroll_size and index_bulk must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }
}

/// Parses a store time value such as `10s`, `500ms`, `1m`, `2h` or `1d`.
pub fn parse_time_value(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let amount: u64 = number
        .parse()
        .map_err(|_| StoreError::format("time value", value, "expected a number followed by a unit"))?;
    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" | "" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount * 60),
        "h" => Duration::from_secs(amount * 3600),
        "d" => Duration::from_secs(amount * 86_400),
        _ => {
            return Err(StoreError::format(
                "time value",
                value,
                "unit must be one of ms, s, m, h, d",
            ))
        }
    };
    Ok(duration)
}

pub fn global_config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join(CONFIG_DIR_NAME));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join(CONFIG_DIR_NAME))
        .ok_or_else(|| StoreError::Configuration("$HOME not configured".to_string()))
}

pub fn global_path() -> Result<PathBuf> {
    Ok(global_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Walks up from `start` looking for a `.shardex` directory, stopping at a
/// git root or the home directory.
pub fn find_local_config_dir(start: &Path) -> Option<PathBuf> {
    let home = dirs::home_dir();
    let mut current_dir = start.to_path_buf();

    loop {
        if current_dir.join(LOCAL_DIR_NAME).is_dir() {
            return Some(current_dir.join(LOCAL_DIR_NAME));
        }
        if current_dir.join(".git").exists() {
            return None;
        }
        if Some(&current_dir) == home.as_ref() {
            return None;
        }
        if !current_dir.pop() {
            return None;
        }
    }
}

pub fn local_path() -> Option<PathBuf> {
    let cwd = env::current_dir().ok()?;
    find_local_config_dir(&cwd).map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Reads one config file. A missing file is an empty config.
pub fn load_file(path: &Path) -> Result<StoreConfig> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StoreConfig::default()),
        Err(err) => {
            return Err(StoreError::Configuration(format!(
                "could not read {}: {err}",
                path.display()
            )))
        }
    };
    let config: StoreConfig = serde_json::from_str(&contents)
        .map_err(|err| StoreError::Configuration(format!("could not parse {}: {err}", path.display())))?;
    for key in config.extra.keys() {
        tracing::warn!(path = %path.display(), "unknown config key {key}");
    }
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Loads `explicit` alone when given, otherwise global merged with local.
pub fn load(explicit: Option<&Path>) -> Result<StoreConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(StoreError::Configuration(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        return load_file(path);
    }
    let global = match global_path() {
        Ok(path) => load_file(&path)?,
        Err(_) => StoreConfig::default(),
    };
    let local = match local_path() {
        Some(path) => load_file(&path)?,
        None => StoreConfig::default(),
    };
    Ok(global.merge(&local))
}

/// Every file [`load`] would read, in precedence order (lowest first).
pub fn sources(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    global_path()
        .ok()
        .into_iter()
        .chain(local_path())
        .filter(|path| path.exists())
        .collect()
}
