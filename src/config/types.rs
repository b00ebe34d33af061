use crate::registry::BindPolicy;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for stepcrawl
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub registry: RegistryConfig,
    pub http: HttpConfig,
}

/// Step scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of scheduler workers
    pub workers: usize,

    /// Minimum time between step executions (milliseconds)
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

impl SchedulerConfig {
    /// Returns the step interval as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            interval_ms: 1000,
        }
    }
}

/// Dependency registry configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// What binding a type twice in one scope does
    #[serde(rename = "duplicate-bindings")]
    pub duplicate_bindings: BindPolicy,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Whole-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Directory for the response cache; `None` disables caching
    ///
    /// An empty `cache-dir = ""` in the file maps to `None`.
    #[serde(rename = "cache-dir", deserialize_with = "deserialize_cache_dir")]
    pub cache_dir: Option<PathBuf>,
}

fn deserialize_cache_dir<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let dir = PathBuf::deserialize(deserializer)?;
    Ok((!dir.as_os_str().is_empty()).then_some(dir))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("stepcrawl/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 5,
            cache_dir: Some(PathBuf::from("tmp")),
        }
    }
}
