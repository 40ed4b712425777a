//! Configuration for the Verdict SDK
//!
//! Configuration is an explicit object handed to whichever component needs
//! it; there is no process-wide singleton. `VerdictConfig::load()` merges
//! defaults, an optional `verdict.toml`, and the environment variables the
//! protocol documents.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, VerdictError};

/// Default bound for the continuous-evaluation queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Default deadline for a sequential engine request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URL for engine release assets.
pub const DEFAULT_RELEASE_BASE_URL: &str =
    "https://github.com/verdict-sdk/verdict/releases/download";

/// Main configuration for the Verdict SDK
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VerdictConfig {
    /// Engine subprocess configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Continuous evaluation configuration
    #[serde(default)]
    pub continuous: ContinuousConfig,

    /// Simulation mode: evaluate_batch returns deterministic pass results
    /// without spawning the engine. Also settable via VERDICT_SIMULATION.
    #[serde(default)]
    pub simulation: bool,
}

/// Engine subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Explicit path to the engine binary; skips the discovery chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Log level passed to the engine as `--log-level=<level>`
    pub log_level: String,

    /// Deadline for one request/response exchange in sequential mode
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Disable network auto-download of the engine binary
    pub no_download: bool,

    /// Override for the per-user binary cache (default `~/.verdict/bin`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Base URL for release assets; tests point this at a local server
    pub release_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            log_level: "warn".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            no_download: false,
            cache_dir: None,
            release_base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
        }
    }
}

/// Continuous evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousConfig {
    /// Maximum queued traces; submissions beyond this are dropped
    pub queue_size: usize,

    /// Fraction of submitted traces that get evaluated, in [0.0, 1.0]
    pub sample_rate: f64,

    /// Generic webhook for drift alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_webhook_url: Option<String>,

    /// Chat-webhook (Slack-style) for drift alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_slack_url: Option<String>,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            sample_rate: 1.0,
            alert_webhook_url: None,
            alert_slack_url: None,
        }
    }
}

/// True when an environment flag is set to 1/true/yes (case-insensitive).
pub fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

impl VerdictConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Merge order:
    /// 1. Defaults
    /// 2. `verdict.toml` (or the file named by VERDICT_CONFIG_PATH)
    /// 3. Environment variable overrides
    pub fn load() -> Result<Self> {
        use figment::{
            providers::{Format, Toml},
            Figment,
        };

        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            VerdictConfig::default(),
        ))
        .merge(Toml::file("verdict.toml"));

        if let Ok(path) = std::env::var("VERDICT_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let mut config: VerdictConfig = figment.extract().map_err(|e| {
            VerdictError::Configuration(format!("failed to load configuration: {}", e))
        })?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply the documented environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("VERDICT_ENGINE_PATH") {
            if !path.is_empty() {
                self.engine.path = Some(PathBuf::from(path));
            }
        }

        if env_flag("VERDICT_ENGINE_NO_DOWNLOAD") {
            self.engine.no_download = true;
        }

        if let Ok(raw) = std::env::var("VERDICT_ENGINE_TIMEOUT") {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs > 0.0 => {
                    self.engine.request_timeout = Duration::from_secs_f64(secs);
                }
                _ => warn!(
                    "VERDICT_ENGINE_TIMEOUT={:?} is not a positive number of seconds; \
                     keeping {:?}",
                    raw, self.engine.request_timeout
                ),
            }
        }

        if let Ok(raw) = std::env::var("VERDICT_CONTINUOUS_QUEUE_SIZE") {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.continuous.queue_size = size,
                _ => warn!(
                    "VERDICT_CONTINUOUS_QUEUE_SIZE={:?} is not a valid size; using default {}",
                    raw, DEFAULT_QUEUE_SIZE
                ),
            }
        }

        if env_flag("VERDICT_SIMULATION") {
            self.simulation = true;
        }

        if let Ok(url) = std::env::var("VERDICT_ALERT_WEBHOOK_URL") {
            if !url.is_empty() {
                self.continuous.alert_webhook_url = Some(url);
            }
        }

        if let Ok(url) = std::env::var("VERDICT_ALERT_SLACK_WEBHOOK_URL") {
            if !url.is_empty() {
                self.continuous.alert_slack_url = Some(url);
            }
        }

        if let Ok(dir) = std::env::var("VERDICT_CACHE_DIR") {
            if !dir.is_empty() {
                self.engine.cache_dir = Some(PathBuf::from(dir));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.continuous.sample_rate) {
            return Err(VerdictError::InvalidSampleRate(self.continuous.sample_rate));
        }
        Ok(())
    }
}
