//! Database configuration loading.
//!
//! ```yaml
//! databases:
//!   default:
//!     dsn: "sqlite://${DATA_DIR:-data}/app.db"
//!     profiler: stdout
//!     retries: 100
//!     retry_delay_ms: 1000
//!     connect_timeout_ms: 120000
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded before parsing. The
//! `FACTORY_DB_*` variables then override the `default` entry.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{ConfigError, ConnectError};
use super::options::ConnectionOptions;
use super::profiler::ProfilerKind;
use super::registry::Registry;

/// Environment variable names.
pub mod vars {
    pub const DSN: &str = "FACTORY_DB_DSN";
    pub const PROFILER: &str = "FACTORY_DB_PROFILER";
    pub const RETRIES: &str = "FACTORY_DB_RETRIES";
    pub const RETRY_DELAY_MS: &str = "FACTORY_DB_RETRY_DELAY_MS";
    pub const CONNECT_TIMEOUT_MS: &str = "FACTORY_DB_CONNECT_TIMEOUT_MS";
}

/// Entry the `FACTORY_DB_*` overrides apply to.
pub const DEFAULT_DATABASE: &str = "default";

/// Named database entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub databases: BTreeMap<String, DatabaseEntry>,
}

/// One database as written in YAML. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseEntry {
    pub dsn: String,
    pub profiler: ProfilerKind,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub min_connections: u32,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub wal_mode: bool,
}

impl Default for DatabaseEntry {
    fn default() -> Self {
        let defaults = ConnectionOptions::default();
        Self {
            dsn: defaults.dsn().to_string(),
            profiler: defaults.profiler(),
            retries: defaults.retries(),
            retry_delay_ms: defaults.retry_delay().as_millis() as u64,
            connect_timeout_ms: defaults.connect_timeout().as_millis() as u64,
            min_connections: defaults.min_connections(),
            max_connections: defaults.max_connections(),
            busy_timeout_ms: defaults.busy_timeout().as_millis() as u64,
            wal_mode: defaults.wal_mode(),
        }
    }
}

impl DatabaseEntry {
    pub fn to_options(&self) -> Result<ConnectionOptions, ConnectError> {
        ConnectionOptions::builder()
            .dsn(self.dsn.clone())
            .profiler(self.profiler)
            .retries(self.retries)
            .retry_delay(Duration::from_millis(self.retry_delay_ms))
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .wal_mode(self.wal_mode)
            .build()
    }
}

impl DatabaseConfig {
    /// Load from a YAML file, expanding `${VAR}` from the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&contents)?;
        info!(path = %path.display(), databases = config.databases.len(), "Database config loaded");
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_str_with(contents, |var| std::env::var(var).ok())
    }

    /// Parse with `lookup` resolving `${VAR}` references.
    pub fn from_yaml_str_with<L>(contents: &str, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let expanded = expand_env_vars(contents, lookup)?;
        let config: Self = serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Parse {
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply the `FACTORY_DB_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides to the `default` entry, creating it if any override
    /// is set.
    pub fn apply_overrides<L>(&mut self, lookup: L) -> Result<(), ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let dsn = lookup(vars::DSN);
        let profiler = lookup(vars::PROFILER)
            .map(|v| {
                v.parse::<ProfilerKind>()
                    .map_err(|message| invalid_override(vars::PROFILER, &message))
            })
            .transpose()?;
        let retries = parse_override::<u32, _>(&lookup, vars::RETRIES)?;
        let retry_delay_ms = parse_override::<u64, _>(&lookup, vars::RETRY_DELAY_MS)?;
        let connect_timeout_ms = parse_override::<u64, _>(&lookup, vars::CONNECT_TIMEOUT_MS)?;

        let any = dsn.is_some()
            || profiler.is_some()
            || retries.is_some()
            || retry_delay_ms.is_some()
            || connect_timeout_ms.is_some();
        if !any {
            return Ok(());
        }

        let entry = self
            .databases
            .entry(DEFAULT_DATABASE.to_string())
            .or_default();
        if let Some(dsn) = dsn {
            entry.dsn = dsn;
        }
        if let Some(profiler) = profiler {
            entry.profiler = profiler;
        }
        if let Some(retries) = retries {
            entry.retries = retries;
        }
        if let Some(delay) = retry_delay_ms {
            entry.retry_delay_ms = delay;
        }
        if let Some(timeout) = connect_timeout_ms {
            entry.connect_timeout_ms = timeout;
        }
        debug!(database = DEFAULT_DATABASE, "Applied environment overrides");

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, entry) in &self.databases {
            entry.to_options().map_err(|e| ConfigError::Validation {
                message: format!("databases.{name}: {e}"),
            })?;
        }
        Ok(())
    }

    /// Connection options per name.
    pub fn to_options(&self) -> Result<BTreeMap<String, ConnectionOptions>, ConfigError> {
        self.databases
            .iter()
            .map(|(name, entry)| {
                let options = entry.to_options().map_err(|e| ConfigError::Validation {
                    message: format!("databases.{name}: {e}"),
                })?;
                Ok((name.clone(), options))
            })
            .collect()
    }

    /// Register every entry with `registry`.
    ///
    /// All entries are attempted; the first failure is returned.
    pub async fn register_all(&self, registry: &Registry) -> Result<(), ConnectError> {
        let mut first_error = None;
        for (name, entry) in &self.databases {
            let outcome = match entry.to_options() {
                Ok(options) => registry.register(name.clone(), &options).await.map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn parse_override<T, L>(lookup: &L, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| invalid_override(var, &e.to_string()))
        })
        .transpose()
}

fn invalid_override(var: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        message: format!("{var}: {message}"),
    }
}

/// Expand `${VAR}` and `${VAR:-default}`.
fn expand_env_vars<L>(content: &str, lookup: L) -> Result<String, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").map_err(|e| ConfigError::Validation {
        message: e.to_string(),
    })?;

    let mut result = String::with_capacity(content.len());
    let mut last = 0;
    for cap in re.captures_iter(content) {
        let Some(full) = cap.get(0) else { continue };
        let var_name = &cap[1];

        let value = match lookup(var_name) {
            Some(v) => v,
            None => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    return Err(ConfigError::EnvVarNotFound {
                        var: var_name.to_string(),
                    })
                }
            },
        };

        result.push_str(&content[last..full.start()]);
        result.push_str(&value);
        last = full.end();
    }
    result.push_str(&content[last..]);

    Ok(result)
}
