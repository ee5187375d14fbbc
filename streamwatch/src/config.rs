//! Application configuration.
//!
//! Settings are shared behind a [`SettingsHandle`] so live changes (probe
//! delay, retry interval) take effect without restarting workers. The whole
//! application state round-trips through a JSON file on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Result, utils::fs};

/// Recorder options applied when the user has not configured any.
pub const DEFAULT_RECORDER_OPTIONS: &str = "--hls-timeout 120 --hls-playlist-reload-attempts 20 --hls-segment-timeout 90 --hds-segment-threads 8 --hls-segment-threads 8 --hds-timeout 120 --hds-segment-timeout 90 --hds-segment-attempts 20";

/// Live-tunable application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path to the recorder executable.
    pub recorder_path: PathBuf,
    /// Extra options prepended to every recorder invocation.
    pub recorder_options: String,
    /// Root for relative output names.
    pub default_records_path: Option<PathBuf>,
    /// Pause between consecutive availability probes, in milliseconds.
    pub http_request_delay_ms: u64,
    /// Seconds between favorites refresh rounds.
    pub favorites_update_interval_secs: u64,
    /// Seconds a waiting supervisor sleeps before asking for another probe.
    pub waiting_task_interval_secs: u64,
    /// Start every tracked identifier at application startup.
    pub record_on_start: bool,
    /// Room-status endpoint URL.
    pub probe_endpoint: String,
    /// Base URL used for the probe Referer header.
    pub probe_referer_base: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recorder_path: PathBuf::from("streamlink"),
            recorder_options: DEFAULT_RECORDER_OPTIONS.to_string(),
            default_records_path: None,
            http_request_delay_ms: 300,
            favorites_update_interval_secs: 60,
            waiting_task_interval_secs: 30,
            record_on_start: false,
            probe_endpoint: String::new(),
            probe_referer_base: None,
        }
    }
}

/// Shared, live-updatable settings.
pub type SettingsHandle = Arc<RwLock<Settings>>;

pub fn settings_handle(settings: Settings) -> SettingsHandle {
    Arc::new(RwLock::new(settings))
}

/// Per-identifier recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Stream identifier (room slug or full profile URL).
    pub identifier: String,
    /// Quality selector passed to the recorder.
    pub quality: String,
    /// Keep probing and resume recording when the stream comes back.
    pub wait_for_available: bool,
    /// Output template; `%DATE%` expands at spawn time. Empty means derive
    /// from the identifier and settings.
    #[serde(default)]
    pub file_name_template: Option<PathBuf>,
}

/// Everything persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: Settings,
    pub records: Vec<TrackConfig>,
    pub favorites: BTreeSet<String>,
}

impl AppConfig {
    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| fs::io_error("reading configuration", path, e))?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Persist configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::ensure_dir_all_sync_with_op("creating configuration directory", parent)?;
        }

        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|e| fs::io_error("writing configuration", path, e))?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }
}
