//! Configuration for the dashboard poller
//!
//! Loads configuration from dashboard.yml; environment variables take
//! precedence over file values.

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::poller::{PollerConfig, RetryPolicy};
use crate::webhook::{WebhookConfig, DEFAULT_LIMIT};
use crate::window::Window;

/// Default constants (fallback if dashboard.yml not found)
pub const CONFIG_FILE: &str = "dashboard.yml";
pub const DEFAULT_STORE_PATH: &str = "dashboard_cache.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_MINUTES: u64 = 30;
pub const DEFAULT_REFRESH_MINUTES: u64 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_SECS: u64 = 2;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    webhook: Option<WebhookSection>,
    polling: Option<PollingSection>,
    store: Option<StoreSection>,
    metrics: Option<MetricsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookSection {
    url: Option<String>,
    limit: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PollingSection {
    window: Option<String>,
    poll_minutes: Option<u64>,
    refresh_minutes: Option<u64>,
    max_retries: Option<u32>,
    retry_base_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSection {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsSection {
    listen: Option<String>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: String,
    pub limit: u32,
    pub timeout_secs: u64,
    pub window: Window,
    pub poll_minutes: u64,
    /// 0 disables the unaligned refresh timer.
    pub refresh_minutes: u64,
    pub max_retries: u32,
    pub retry_base_secs: u64,
    pub store_path: PathBuf,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from dashboard.yml or use defaults
    /// Environment variables take precedence over dashboard.yml values
    pub fn new() -> Self {
        Self::load_from_file(CONFIG_FILE)
            .or_else(|_| Self::load_from_file(Path::new("..").join(CONFIG_FILE)))
            .unwrap_or_else(|_| Self::from_yaml(YamlConfig::default()))
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return Some(env_val);
        }
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    fn resolve_env_u64(value: Option<u64>, env_key: &str) -> Option<u64> {
        std::env::var(env_key)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .or(value)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        Ok(Self::from_yaml(yaml))
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let webhook = yaml.webhook.unwrap_or_default();
        let polling = yaml.polling.unwrap_or_default();
        let store = yaml.store.unwrap_or_default();
        let metrics = yaml.metrics.unwrap_or_default();

        let webhook_url =
            Self::resolve_env_string(webhook.url, "DASHBOARD_WEBHOOK_URL").unwrap_or_default();
        let window = Window::parse_or_default(
            Self::resolve_env_string(polling.window, "DASHBOARD_WINDOW").as_deref(),
        );
        let store_path = Self::resolve_env_string(store.path, "DASHBOARD_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
        let metrics_addr = Self::resolve_env_string(metrics.listen, "DASHBOARD_METRICS_ADDR")
            .and_then(|addr| match addr.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "Ignoring invalid metrics address");
                    None
                }
            });

        Self {
            webhook_url,
            limit: webhook.limit.unwrap_or(DEFAULT_LIMIT),
            timeout_secs: Self::resolve_env_u64(webhook.timeout_secs, "DASHBOARD_TIMEOUT")
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            window,
            poll_minutes: polling
                .poll_minutes
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_POLL_MINUTES),
            refresh_minutes: polling.refresh_minutes.unwrap_or(DEFAULT_REFRESH_MINUTES),
            max_retries: polling.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_base_secs: polling.retry_base_secs.unwrap_or(DEFAULT_RETRY_BASE_SECS),
            store_path,
            metrics_addr,
        }
    }

    pub fn webhook(&self) -> WebhookConfig {
        WebhookConfig {
            url: self.webhook_url.clone(),
            limit: self.limit,
            timeout_secs: self.timeout_secs,
        }
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            window: self.window,
            poll_interval: Duration::from_secs(self.poll_minutes * 60),
            refresh_interval: (self.refresh_minutes > 0)
                .then(|| Duration::from_secs(self.refresh_minutes * 60)),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_secs(self.retry_base_secs),
            },
        }
    }
}
