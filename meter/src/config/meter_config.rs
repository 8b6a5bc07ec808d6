use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "METER";
const MAX_FETCH_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Listen address of the auth/reporting API
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// SQLite database file holding users, nodes and traffic counters
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Seconds between two traffic collection ticks
    #[serde(default = "default_collect_interval_secs")]
    pub collect_interval_secs: u64,

    /// Per-node deadline for one traffic scrape, capped at 5 seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for file-based logging; stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Number of Tokio runtime worker threads (defaults to CPU cores)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_threads: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_port: Option<u16>,
}

fn default_api_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_path() -> String {
    "data/meter.db".to_string()
}

fn default_collect_interval_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    MAX_FETCH_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "meter.log".to_string()
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            api_addr: default_api_addr(),
            database_path: default_database_path(),
            collect_interval_secs: default_collect_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            log_level: default_log_level(),
            log_dir: None,
            log_file: default_log_file(),
            runtime_threads: None,
            console_port: None,
        }
    }
}

impl MeterConfig {
    /// Load the TOML file at `path` if it exists, then apply `METER_*`
    /// environment overrides on top of the file and the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::load_with_env(path, config::Environment::with_prefix(ENV_PREFIX))
    }

    pub(crate) fn load_with_env<P: AsRef<Path>>(
        path: P,
        env: config::Environment,
    ) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(env.try_parsing(true))
            .build()?;
        let config: MeterConfig = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.clamp(1, MAX_FETCH_TIMEOUT_SECS))
    }
}
