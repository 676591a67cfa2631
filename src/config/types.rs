use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub shipper: ShipperConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Public base URL of the learning platform
    #[serde(default)]
    pub site_url: Option<String>,
    /// Language key for localized activity names
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            site_url: None,
            lang: default_lang(),
        }
    }
}

fn default_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batches_per_run")]
    pub max_batches_per_run: usize,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batches_per_run: default_max_batches_per_run(),
            interval: default_interval(),
            lock: LockConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_max_batches_per_run() -> usize {
    20
}

fn default_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lifetime of the run lock; must outlast a worst-case run
    #[serde(default = "default_lock_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// How long to wait for a busy lock before skipping the run
    #[serde(default, with = "humantime_serde")]
    pub wait: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: default_lock_ttl(),
            wait: Duration::ZERO,
        }
    }
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipperConfig {
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
        }
    }
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}
