use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of ticks kept in every history sequence.
pub const DEFAULT_HISTORY_LENGTH: usize = 100;
/// Default sampler period.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;
/// RTT (ms) at which the RTT half of the congestion score saturates.
pub const DEFAULT_RTT_THRESHOLD_MS: f64 = 100.0;
/// A tick whose score is strictly above this records a congestion event.
pub const DEFAULT_CONGESTION_EVENT_THRESHOLD: f64 = 0.7;
/// Largest window assumed before any window size has been observed.
pub const DEFAULT_INITIAL_MAX_WINDOW_SIZE: u64 = 1000;

pub const DEFAULT_INTERFACE: &str = "lo0";
pub const DEFAULT_DISPLAY_FILTER: &str = "tcp";

/// Current version of the crate.
pub(crate) const PCK_VERSION: &str = env!("CARGO_PKG_VERSION");

const QUALIFIER: &str = "";
const ORGANIZATION: &str = "";
const APPLICATION: &str = "congestion-monitor";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unsupported configuration file format: {0:?}")]
    UnsupportedFormat(PathBuf),
}

/// What the sampler records for a metric that was not refreshed since the
/// previous tick.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StaleValues {
    /// Keep reporting the last known value.
    #[default]
    Repeat,
    /// Record the metric as missing for that tick.
    Mark,
}

/// Sampling and scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub history_length: usize,
    pub sample_interval_ms: u64,
    pub rtt_threshold_ms: f64,
    pub congestion_event_threshold: f64,
    pub initial_max_window_size: u64,
    pub stale_values: StaleValues,
    /// Bound on retained congestion events; unbounded when not set.
    pub max_congestion_events: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            history_length: DEFAULT_HISTORY_LENGTH,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            rtt_threshold_ms: DEFAULT_RTT_THRESHOLD_MS,
            congestion_event_threshold: DEFAULT_CONGESTION_EVENT_THRESHOLD,
            initial_max_window_size: DEFAULT_INITIAL_MAX_WINDOW_SIZE,
            stale_values: StaleValues::default(),
            max_congestion_events: None,
        }
    }
}

impl SamplerConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Capacity of every history sequence.
    pub fn history_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.history_length)
            .ok_or_else(|| invalid("history_length", "must be positive"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.history_capacity()?;
        if self.sample_interval_ms == 0 {
            return Err(invalid("sample_interval_ms", "must be positive"));
        }
        if !(self.rtt_threshold_ms.is_finite() && self.rtt_threshold_ms > 0.0) {
            return Err(invalid(
                "rtt_threshold_ms",
                format!("must be a positive number, got {}", self.rtt_threshold_ms),
            ));
        }
        let threshold = self.congestion_event_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(invalid(
                "congestion_event_threshold",
                format!("must be in (0, 1], got {threshold}"),
            ));
        }
        if self.initial_max_window_size == 0 {
            return Err(invalid("initial_max_window_size", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: String,
    pub display_filter: String,
    /// Explicit tshark binary; looked up on `PATH` otherwise.
    pub tshark_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_owned(),
            display_filter: DEFAULT_DISPLAY_FILTER.to_owned(),
            tshark_path: None,
        }
    }
}

/// Fully resolved monitor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampler.validate()
    }

    /// Reads a TOML or JSON configuration file, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading configuration file {path:?}"))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let config = match ext {
            "toml" => toml::from_str::<Config>(&content)
                .with_context(|| format!("invalid TOML in {path:?}"))?,
            "json" => serde_json::from_str::<Config>(&content)
                .with_context(|| format!("invalid JSON in {path:?}"))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_owned()).into()),
        };
        Ok(config)
    }

    /// Configuration directory for this application, if the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
            .map(|dirs| dirs.config_dir().to_owned())
    }

    fn find_in_dir(dir: &Path) -> Option<PathBuf> {
        ["config.toml", "config.json"]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }
}

#[derive(clap::Parser, Debug, Clone, Default)]
#[command(version = PCK_VERSION, about = "Live TCP congestion monitor")]
pub struct ConfigArgs {
    /// Configuration file (TOML or JSON). Defaults to `config.toml` in the
    /// platform configuration directory when present.
    #[arg(long, env = "CONGESTION_MONITOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Network interface to capture packets from (default: lo0).
    #[arg(long, env = "CONGESTION_MONITOR_INTERFACE")]
    pub interface: Option<String>,

    /// Display filter for packet capture (default: tcp).
    #[arg(long)]
    pub filter: Option<String>,

    /// Path to the tshark binary.
    #[arg(long, env = "TSHARK_PATH")]
    pub tshark_path: Option<PathBuf>,

    /// Number of data points to keep in history (default: 100).
    #[arg(long)]
    pub history: Option<usize>,

    /// Sampling interval in milliseconds (default: 100).
    #[arg(long)]
    pub interval: Option<u64>,

    /// RTT threshold in ms for congestion scoring (default: 100.0).
    #[arg(long)]
    pub rtt_threshold: Option<f64>,

    /// Score above which a tick counts as a congestion event (default: 0.7).
    #[arg(long)]
    pub event_threshold: Option<f64>,

    /// Largest window size assumed before one is observed (default: 1000).
    #[arg(long)]
    pub initial_max_window: Option<u64>,

    /// How to record metrics that were not refreshed since the previous tick.
    #[arg(long, value_enum)]
    pub stale_values: Option<StaleValues>,

    /// Keep at most this many congestion events.
    #[arg(long)]
    pub max_events: Option<usize>,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<tracing::level_filters::LevelFilter>,

    /// Print one JSON document per tick instead of a text line.
    #[arg(long)]
    pub json: bool,
}

impl ConfigArgs {
    /// Merges the command line over the configuration file and validates the result.
    pub fn build(self) -> anyhow::Result<Config> {
        let file = match &self.config {
            Some(path) => Some(path.clone()),
            None => Config::default_dir().and_then(|dir| Config::find_in_dir(&dir)),
        };
        let mut config = match file {
            Some(path) => {
                tracing::debug!(path = ?path, "Reading configuration file");
                Config::from_file(&path)?
            }
            None => Config::default(),
        };

        let capture = &mut config.capture;
        if let Some(interface) = self.interface {
            capture.interface = interface;
        }
        if let Some(filter) = self.filter {
            capture.display_filter = filter;
        }
        if let Some(path) = self.tshark_path {
            capture.tshark_path = Some(path);
        }

        let sampler = &mut config.sampler;
        if let Some(history) = self.history {
            sampler.history_length = history;
        }
        if let Some(interval) = self.interval {
            sampler.sample_interval_ms = interval;
        }
        if let Some(rtt) = self.rtt_threshold {
            sampler.rtt_threshold_ms = rtt;
        }
        if let Some(threshold) = self.event_threshold {
            sampler.congestion_event_threshold = threshold;
        }
        if let Some(max_window) = self.initial_max_window {
            sampler.initial_max_window_size = max_window;
        }
        if let Some(stale) = self.stale_values {
            sampler.stale_values = stale;
        }
        if let Some(max_events) = self.max_events {
            sampler.max_congestion_events = Some(max_events);
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::AtomicBool;

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
}
