use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// libcurl transfer limits applied to every `HttpRequest` built from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Whole-transfer timeout; 0 disables it.
    pub timeout_secs: u64,
    /// Abort when slower than this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    pub max_redirections: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            timeout_secs: 3600,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            max_redirections: 10,
        }
    }
}

/// Global configuration loaded from `~/.config/netq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetqConfig {
    /// Maximum requests running at once (0 = unbounded).
    pub max_concurrent_requests: usize,
    /// Cancel every other request when one fails.
    pub cancel_all_on_failure: bool,
    /// Probe transfer sizes (HEAD) before starting so progress totals are known up front.
    pub show_accurate_progress: bool,
    /// Interval of the status poll that catches requests which finished without signalling.
    pub status_poll_interval_ms: u64,
    /// Lock holds longer than this are logged as budget overruns.
    pub bookkeeping_budget_ms: u64,
    #[serde(default)]
    pub http: Option<HttpConfig>,
    /// Optional retry policy for HTTP requests; if missing, requests are not retried.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for NetqConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            cancel_all_on_failure: true,
            show_accurate_progress: false,
            status_poll_interval_ms: 250,
            bookkeeping_budget_ms: 5,
            http: None,
            retry: None,
        }
    }
}

impl NetqConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(1))
    }

    pub fn bookkeeping_budget(&self) -> Duration {
        Duration::from_millis(self.bookkeeping_budget_ms)
    }

    pub fn http_or_default(&self) -> HttpConfig {
        self.http.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("netq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<NetqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = NetqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: NetqConfig = toml::from_str(&data)?;
    Ok(cfg)
}
