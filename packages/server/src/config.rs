//! Server configuration.
//!
//! Values come from environment variables, optionally layered over a TOML
//! file named by `CENSUS_RADIUS_CONFIG`. An environment variable always
//! wins over the same key in the file.
//!
//! ```toml
//! bind_addr = "0.0.0.0"
//! port = 8080
//! dataset = "data/pop2010.bin"
//! layout = "compact"
//! payloads = "data/pop2010.duckdb"
//! workers = 4
//! deadline_ms = 2000
//! strategy = "rtree"
//! strict_totals = false
//! ```

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use census_radius_dataset::{DatasetLayout, DatasetSource, LoadOptions};
use census_radius_query::{FilterStrategy, QueryOptions};
use serde::Deserialize;

pub const CONFIG_VAR: &str = "CENSUS_RADIUS_CONFIG";
pub const BIND_ADDR_VAR: &str = "BIND_ADDR";
pub const PORT_VAR: &str = "PORT";
pub const DATASET_VAR: &str = "CENSUS_RADIUS_DATASET";
pub const LAYOUT_VAR: &str = "CENSUS_RADIUS_LAYOUT";
pub const PAYLOADS_VAR: &str = "CENSUS_RADIUS_PAYLOADS";
pub const WORKERS_VAR: &str = "CENSUS_RADIUS_WORKERS";
pub const DEADLINE_VAR: &str = "CENSUS_RADIUS_DEADLINE_MS";
pub const STRATEGY_VAR: &str = "CENSUS_RADIUS_STRATEGY";
pub const STRICT_TOTALS_VAR: &str = "CENSUS_RADIUS_STRICT_TOTALS";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path from `CENSUS_RADIUS_CONFIG`.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`ServerConfig`].
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// Path from `CENSUS_RADIUS_CONFIG`.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value could not be parsed.
    #[error("Invalid {key} value {value:?}: {message}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        message: String,
    },

    /// A required value is absent from both the environment and the file.
    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bind_addr: Option<String>,
    port: Option<u16>,
    dataset: Option<PathBuf>,
    layout: Option<DatasetLayout>,
    payloads: Option<PathBuf>,
    workers: Option<usize>,
    deadline_ms: Option<u64>,
    strategy: Option<FilterStrategy>,
    strict_totals: Option<bool>,
}

impl ConfigFile {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::de::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

/// Everything the server needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub dataset: DatasetSource,
    /// Payload CSV or `.duckdb` store. Required unless the dataset layout
    /// carries demographics.
    pub payloads: Option<PathBuf>,
    pub load: LoadOptions,
    pub query: QueryOptions,
}

impl ServerConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or any
    /// value is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which stands in for the
    /// environment.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match lookup(CONFIG_VAR) {
            Some(path) => {
                log::info!("Reading configuration from {path}");
                ConfigFile::read(Path::new(&path))?
            }
            None => ConfigFile::default(),
        };

        let bind_addr = lookup(BIND_ADDR_VAR)
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let port = parse_var(&lookup, PORT_VAR)?
            .or(file.port)
            .unwrap_or(DEFAULT_PORT);

        let path = lookup(DATASET_VAR)
            .map(PathBuf::from)
            .or(file.dataset)
            .ok_or(ConfigError::Missing(DATASET_VAR))?;
        let layout = parse_var(&lookup, LAYOUT_VAR)?
            .or(file.layout)
            .unwrap_or(DatasetLayout::Extended);
        let payloads = lookup(PAYLOADS_VAR).map(PathBuf::from).or(file.payloads);

        let defaults = QueryOptions::default();
        let workers = parse_var(&lookup, WORKERS_VAR)?
            .or(file.workers)
            .unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: WORKERS_VAR,
                value: workers.to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let deadline = parse_var(&lookup, DEADLINE_VAR)?
            .or(file.deadline_ms)
            .map(Duration::from_millis);
        let strategy = parse_var(&lookup, STRATEGY_VAR)?
            .or(file.strategy)
            .unwrap_or(defaults.strategy);
        let strict_totals = parse_var(&lookup, STRICT_TOTALS_VAR)?
            .or(file.strict_totals)
            .unwrap_or(LoadOptions::default().strict_totals);

        Ok(Self {
            bind_addr,
            port,
            dataset: DatasetSource { path, layout },
            payloads,
            load: LoadOptions { strict_totals },
            query: QueryOptions {
                workers,
                deadline,
                strategy,
            },
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
                value,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_dataset_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[(DATASET_VAR, "blocks.bin")])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.dataset.path, PathBuf::from("blocks.bin"));
        assert_eq!(config.dataset.layout, DatasetLayout::Extended);
        assert_eq!(config.payloads, None);
        assert!(config.load.strict_totals);
        assert_eq!(config.query.deadline, None);
        assert_eq!(config.query.strategy, FilterStrategy::RTree);
        assert!(config.query.workers >= 1);
    }

    #[test]
    fn dataset_is_required() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(DATASET_VAR))
        ));
    }

    #[test]
    fn environment_values_are_parsed() {
        let config = ServerConfig::from_lookup(lookup(&[
            (DATASET_VAR, "nozgeo.txt"),
            (LAYOUT_VAR, "text"),
            (PAYLOADS_VAR, "payloads.csv"),
            (PORT_VAR, "9000"),
            (WORKERS_VAR, "3"),
            (DEADLINE_VAR, "250"),
            (STRATEGY_VAR, "linear"),
            (STRICT_TOTALS_VAR, "false"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.dataset.layout, DatasetLayout::Text);
        assert_eq!(config.payloads, Some(PathBuf::from("payloads.csv")));
        assert_eq!(config.query.workers, 3);
        assert_eq!(config.query.deadline, Some(Duration::from_millis(250)));
        assert_eq!(config.query.strategy, FilterStrategy::LinearScan);
        assert!(!config.load.strict_totals);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = ServerConfig::from_lookup(lookup(&[
            (DATASET_VAR, "blocks.bin"),
            (PORT_VAR, "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: PORT_VAR, .. }));

        let err = ServerConfig::from_lookup(lookup(&[
            (DATASET_VAR, "blocks.bin"),
            (WORKERS_VAR, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: WORKERS_VAR, .. }));

        let err = ServerConfig::from_lookup(lookup(&[
            (DATASET_VAR, "blocks.bin"),
            (LAYOUT_VAR, "parquet"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: LAYOUT_VAR, .. }));
    }

    #[test]
    fn environment_overrides_config_file() {
        let path = std::env::temp_dir().join("census_radius_server_config.toml");
        std::fs::write(
            &path,
            "port = 7000\ndataset = \"from-file.bin\"\nlayout = \"compact\"\n\
             payloads = \"from-file.duckdb\"\ndeadline_ms = 50\nstrategy = \"linear\"\n",
        )
        .unwrap();
        let path_str = path.display().to_string();

        let config = ServerConfig::from_lookup(lookup(&[
            (CONFIG_VAR, path_str.as_str()),
            (PORT_VAR, "7100"),
        ]))
        .unwrap();
        assert_eq!(config.port, 7100);
        assert_eq!(config.dataset.path, PathBuf::from("from-file.bin"));
        assert_eq!(config.dataset.layout, DatasetLayout::Compact);
        assert_eq!(config.payloads, Some(PathBuf::from("from-file.duckdb")));
        assert_eq!(config.query.deadline, Some(Duration::from_millis(50)));
        assert_eq!(config.query.strategy, FilterStrategy::LinearScan);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let path = std::env::temp_dir().join("census_radius_server_bad_config.toml");
        std::fs::write(&path, "dataset = \"a.bin\"\nshards = 4\n").unwrap();
        let path_str = path.display().to_string();

        let err = ServerConfig::from_lookup(lookup(&[(CONFIG_VAR, path_str.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = ServerConfig::from_lookup(lookup(&[(
            CONFIG_VAR,
            "/nonexistent/census_radius.toml",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
