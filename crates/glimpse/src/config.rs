use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use glimpse_core::LivenessThresholds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which message bus the face-analysis service listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Session configuration: defaults, then an optional TOML file, then `GLIMPSE_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width; the driver may negotiate another size.
    pub frame_width: u32,
    /// Requested capture height.
    pub frame_height: u32,
    /// Resolution overlays and landmark thresholds are expressed in.
    /// Defaults to the negotiated capture size.
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    /// Detection loop cadence in milliseconds.
    pub tick_interval_ms: u64,
    /// EAR below which the eyes count as closed.
    pub ear_threshold: f32,
    /// Nose-tip displacement in display pixels that counts as a head turn.
    pub head_move_threshold: f32,
    /// Maximum descriptor distance for a named match.
    pub match_distance_threshold: f32,
    /// Repeated recognitions of one label within this window are logged once.
    pub dedup_window_secs: u64,
    /// Number of recent recognitions kept.
    pub recognized_log_capacity: usize,
    pub analyzer_bus: BusKind,
    pub analyzer_service: String,
    pub analyzer_path: String,
    /// When set, the overlay is rendered to this PNG after every tick.
    pub overlay_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            display_width: None,
            display_height: None,
            tick_interval_ms: 300,
            ear_threshold: glimpse_core::liveness::DEFAULT_EAR_THRESHOLD,
            head_move_threshold: glimpse_core::liveness::DEFAULT_HEAD_MOVE_THRESHOLD,
            match_distance_threshold: 0.6,
            dedup_window_secs: 5,
            recognized_log_capacity: 5,
            analyzer_bus: BusKind::Session,
            analyzer_service: "org.glimpse.FaceAnalysis1".to_string(),
            analyzer_path: "/org/glimpse/FaceAnalysis1".to_string(),
            overlay_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `GLIMPSE_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("GLIMPSE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        override_parsed(&lookup, "GLIMPSE_FRAME_WIDTH", &mut self.frame_width);
        override_parsed(&lookup, "GLIMPSE_FRAME_HEIGHT", &mut self.frame_height);
        if let Some(v) = lookup("GLIMPSE_DISPLAY_WIDTH").and_then(|v| v.parse().ok()) {
            self.display_width = Some(v);
        }
        if let Some(v) = lookup("GLIMPSE_DISPLAY_HEIGHT").and_then(|v| v.parse().ok()) {
            self.display_height = Some(v);
        }
        override_parsed(&lookup, "GLIMPSE_TICK_INTERVAL_MS", &mut self.tick_interval_ms);
        override_parsed(&lookup, "GLIMPSE_EAR_THRESHOLD", &mut self.ear_threshold);
        override_parsed(&lookup, "GLIMPSE_HEAD_MOVE_THRESHOLD", &mut self.head_move_threshold);
        override_parsed(
            &lookup,
            "GLIMPSE_MATCH_DISTANCE_THRESHOLD",
            &mut self.match_distance_threshold,
        );
        override_parsed(&lookup, "GLIMPSE_DEDUP_WINDOW_SECS", &mut self.dedup_window_secs);
        override_parsed(
            &lookup,
            "GLIMPSE_RECOGNIZED_LOG_CAPACITY",
            &mut self.recognized_log_capacity,
        );
        match lookup("GLIMPSE_ANALYZER_BUS").as_deref() {
            Some("system") => self.analyzer_bus = BusKind::System,
            Some("session") => self.analyzer_bus = BusKind::Session,
            _ => {}
        }
        if let Some(v) = lookup("GLIMPSE_ANALYZER_SERVICE") {
            self.analyzer_service = v;
        }
        if let Some(v) = lookup("GLIMPSE_ANALYZER_PATH") {
            self.analyzer_path = v;
        }
        if let Some(v) = lookup("GLIMPSE_OVERLAY_PATH") {
            self.overlay_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn thresholds(&self) -> LivenessThresholds {
        LivenessThresholds {
            ear_threshold: self.ear_threshold,
            head_move_threshold: self.head_move_threshold,
        }
    }

    /// Display size, falling back to the capture size for unset dimensions.
    pub fn display_size(&self, frame: (u32, u32)) -> (u32, u32) {
        (
            self.display_width.unwrap_or(frame.0),
            self.display_height.unwrap_or(frame.1),
        )
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}
