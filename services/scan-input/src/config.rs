//! Process configuration (env-driven).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use scanprep_fetch::{BackoffPolicy, TransportConfig};

/// Scan input configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for downloaded inputs, reconstructed images and scratch files.
    pub work_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Per-request timeout; unset leaves large transfers unbounded.
    pub request_timeout: Option<Duration>,

    /// Retry attempts for transient HTTP failures.
    pub max_retries: u32,

    /// First retry delay.
    pub backoff_base: Duration,

    /// Retry delay ceiling.
    pub backoff_max: Duration,

    /// Deadline for acquiring one task's input.
    pub download_timeout: Option<Duration>,

    /// Permission bits for directories created by extraction.
    pub extract_mode: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/scanprep/workspace"),
            log_level: "info".to_string(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: None,
            max_retries: 4,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            download_timeout: None,
            extract_mode: 0o755,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let work_dir = lookup("SCANPREP_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);

        let log_level = lookup("SCANPREP_LOG_LEVEL").unwrap_or(defaults.log_level);

        let connect_timeout = lookup("SCANPREP_CONNECT_TIMEOUT_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("SCANPREP_CONNECT_TIMEOUT_SECS must be an integer (seconds).")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);

        let request_timeout = lookup("SCANPREP_REQUEST_TIMEOUT_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("SCANPREP_REQUEST_TIMEOUT_SECS must be an integer (seconds).")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let max_retries = lookup("SCANPREP_MAX_RETRIES")
            .map(|v| v.parse())
            .transpose()
            .context("SCANPREP_MAX_RETRIES must be an integer.")?
            .unwrap_or(defaults.max_retries);

        let backoff_base = lookup("SCANPREP_BACKOFF_BASE_MS")
            .map(|v| v.parse())
            .transpose()
            .context("SCANPREP_BACKOFF_BASE_MS must be an integer (milliseconds).")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_base);

        let backoff_max = lookup("SCANPREP_BACKOFF_MAX_MS")
            .map(|v| v.parse())
            .transpose()
            .context("SCANPREP_BACKOFF_MAX_MS must be an integer (milliseconds).")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_max)
            .max(backoff_base);

        let download_timeout = lookup("SCANPREP_DOWNLOAD_TIMEOUT_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("SCANPREP_DOWNLOAD_TIMEOUT_SECS must be an integer (seconds).")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let extract_mode = lookup("SCANPREP_EXTRACT_MODE")
            .map(|v| u32::from_str_radix(v.trim_start_matches("0o"), 8))
            .transpose()
            .context("SCANPREP_EXTRACT_MODE must be an octal mode (e.g. 755).")?
            .unwrap_or(defaults.extract_mode);

        Ok(Self {
            work_dir,
            log_level,
            connect_timeout,
            request_timeout,
            max_retries,
            backoff_base,
            backoff_max,
            download_timeout,
            extract_mode,
        })
    }

    /// HTTP transport settings derived from this configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            max_retries: self.max_retries,
            backoff: BackoffPolicy {
                base: self.backoff_base,
                max: self.backoff_max,
            },
            ..Default::default()
        }
    }
}
