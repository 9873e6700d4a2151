//! Runtime configuration, loaded from a TOML file.
//!
//! Every field has a default, so a missing or empty file yields a working
//! setup: an SQLite store in the user data directory and the simulator
//! tuned to a 20% baseline with 80% anomaly plateaus.

use crate::telemetry::{opensearch, schema};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "telemetry.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Opensearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Series (table or index) name
    #[serde(default = "default_series")]
    pub series: String,

    /// Database file for the sqlite backend; `~` is expanded
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default)]
    pub opensearch: OpenSearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSearchConfig {
    #[serde(default = "default_opensearch_url")]
    pub url: String,

    #[serde(default = "default_opensearch_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Skip certificate verification (self-signed dev clusters)
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Seconds between samples
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Chance per normal tick of starting a burst (0.0 - 1.0)
    #[serde(default = "default_anomaly_probability")]
    pub anomaly_probability: f64,

    /// Length of a burst in ticks
    #[serde(default = "default_anomaly_duration")]
    pub anomaly_duration_ticks: u32,

    #[serde(default = "default_cpu_base")]
    pub cpu_base: f64,

    #[serde(default = "default_cpu_anomaly")]
    pub cpu_anomaly: f64,

    /// Symmetric jitter bound, percent of the base value
    #[serde(default = "default_delta_percent")]
    pub delta_percent: f64,

    /// Wait before the first write, e.g. while the store boots
    #[serde(default)]
    pub startup_delay_secs: u64,

    /// Fixed RNG seed for reproducible runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Most anomalies returned by a single listing
    #[serde(default = "default_anomaly_cap")]
    pub anomaly_cap: usize,

    /// Window of the "last minute" average, seconds
    #[serde(default = "default_average_window")]
    pub average_window_secs: u64,
}

fn default_series() -> String {
    "cpu-index".to_string()
}

fn default_sqlite_path() -> String {
    directories::ProjectDirs::from("", "", "cputel")
        .map(|dirs| dirs.data_dir().join(DB_FILE).display().to_string())
        .unwrap_or_else(|| format!("./{DB_FILE}"))
}

fn default_opensearch_url() -> String {
    "https://localhost:9200".to_string()
}

fn default_opensearch_username() -> String {
    "admin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    1
}

fn default_anomaly_probability() -> f64 {
    0.02
}

fn default_anomaly_duration() -> u32 {
    30
}

fn default_cpu_base() -> f64 {
    20.0
}

fn default_cpu_anomaly() -> f64 {
    80.0
}

fn default_delta_percent() -> f64 {
    20.0
}

fn default_anomaly_cap() -> usize {
    1000
}

fn default_average_window() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            series: default_series(),
            sqlite_path: default_sqlite_path(),
            opensearch: OpenSearchConfig::default(),
        }
    }
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            url: default_opensearch_url(),
            username: default_opensearch_username(),
            password: String::new(),
            accept_invalid_certs: default_true(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            anomaly_probability: default_anomaly_probability(),
            anomaly_duration_ticks: default_anomaly_duration(),
            cpu_base: default_cpu_base(),
            cpu_anomaly: default_cpu_anomaly(),
            delta_percent: default_delta_percent(),
            startup_delay_secs: 0,
            seed: None,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            anomaly_cap: default_anomaly_cap(),
            average_window_secs: default_average_window(),
        }
    }
}

impl GeneratorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

impl StoreConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.sqlite_path).into_owned())
    }
}

impl Config {
    /// Default location: `<config dir>/cputel/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cputel").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config")
    }

    pub fn validate(&self) -> Result<()> {
        schema::validate_series_name(&self.store.series).map_err(anyhow::Error::msg)?;

        let g = &self.generator;
        if !(0.0..=1.0).contains(&g.anomaly_probability) {
            bail!(
                "generator.anomaly_probability must be within 0.0-1.0, got {}",
                g.anomaly_probability
            );
        }
        if g.anomaly_duration_ticks == 0 {
            bail!("generator.anomaly_duration_ticks must be at least 1");
        }
        if g.tick_interval_secs == 0 {
            bail!("generator.tick_interval_secs must be at least 1");
        }
        if !(0.0..=100.0).contains(&g.delta_percent) {
            bail!(
                "generator.delta_percent must be within 0-100, got {}",
                g.delta_percent
            );
        }
        if !(g.cpu_base.is_finite() && g.cpu_base >= 0.0) {
            bail!("generator.cpu_base must be a non-negative number");
        }
        if !(g.cpu_anomaly.is_finite() && g.cpu_anomaly >= 0.0) {
            bail!("generator.cpu_anomaly must be a non-negative number");
        }

        if self.query.anomaly_cap == 0 {
            bail!("query.anomaly_cap must be at least 1");
        }
        if self.store.backend == StoreBackend::Opensearch && self.store.opensearch.url.is_empty() {
            bail!("store.opensearch.url is required for the opensearch backend");
        }
        // The listing asks for one hit past the cap to detect truncation.
        if self.store.backend == StoreBackend::Opensearch
            && self.query.anomaly_cap >= opensearch::MAX_RESULT_WINDOW
        {
            bail!(
                "query.anomaly_cap must be below {} for the opensearch backend, got {}",
                opensearch::MAX_RESULT_WINDOW,
                self.query.anomaly_cap
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.series, "cpu-index");
        assert_eq!(config.generator.anomaly_duration_ticks, 30);
        assert_eq!(config.generator.cpu_base, 20.0);
        assert_eq!(config.query.anomaly_cap, 1000);
        assert_eq!(config.query.average_window_secs, 60);
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_sections() {
        let config = Config::parse(
            r#"
            [store]
            backend = "opensearch"
            series = "host-1"

            [store.opensearch]
            url = "https://oe-cont:9200"
            password = "secret"

            [generator]
            anomaly_probability = 0.05
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Opensearch);
        assert_eq!(config.store.opensearch.username, "admin");
        assert_eq!(config.store.opensearch.password, "secret");
        assert!(config.store.opensearch.accept_invalid_certs);
        assert_eq!(config.generator.anomaly_probability, 0.05);
        assert_eq!(config.generator.seed, Some(7));
        assert_eq!(config.generator.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let invalid = |edit: fn(&mut Config)| {
            let mut config = Config::default();
            edit(&mut config);
            config.validate().is_err()
        };
        assert!(invalid(|c| c.generator.anomaly_probability = 1.5));
        assert!(invalid(|c| c.generator.anomaly_duration_ticks = 0));
        assert!(invalid(|c| c.generator.tick_interval_secs = 0));
        assert!(invalid(|c| c.generator.delta_percent = -5.0));
        assert!(invalid(|c| c.query.anomaly_cap = 0));
        assert!(invalid(|c| c.store.series = "cpu index".into()));
    }

    #[test]
    fn anomaly_cap_bounded_by_opensearch_result_window() {
        let mut config = Config {
            store: StoreConfig {
                backend: StoreBackend::Opensearch,
                ..StoreConfig::default()
            },
            query: QueryConfig {
                anomaly_cap: 9_999,
                ..QueryConfig::default()
            },
            ..Config::default()
        };
        config.validate().unwrap();

        config.query.anomaly_cap = 10_000;
        assert!(config.validate().is_err());

        config.store.backend = StoreBackend::Sqlite;
        config.validate().unwrap();
    }

    #[test]
    fn expands_home_in_sqlite_path() {
        if std::env::var_os("HOME").is_none() {
            return;
        }
        let store = StoreConfig {
            sqlite_path: "~/cputel/telemetry.db".into(),
            ..StoreConfig::default()
        };
        assert!(!store.sqlite_path().starts_with("~"));
    }

    #[test]
    fn toml_output_parses_back() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed.store.series, config.store.series);
        assert_eq!(parsed.generator.cpu_anomaly, config.generator.cpu_anomaly);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(&tmp.path().join("absent.toml"))).is_err());
    }
}
