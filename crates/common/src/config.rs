//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where snapshots and schedules are stored.
    pub data_dir: PathBuf,

    /// Camera acquisition settings.
    pub camera: CameraDefaults,

    /// Detection model settings.
    pub detection: DetectionDefaults,

    /// Capture worker settings.
    pub worker: WorkerDefaults,

    /// Scheduled snapshot settings.
    pub automation: AutomationDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Which camera backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackendKind {
    /// Real devices through GStreamer.
    Gstreamer,
    /// Generated test-pattern devices.
    Synthetic,
}

/// Camera acquisition parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    /// Device indices `0..probe_limit` are probed during enumeration.
    pub probe_limit: u32,

    /// Requested capture width (best effort).
    pub width: u32,

    /// Requested capture height (best effort).
    pub height: u32,

    /// Requested capture frame rate (best effort).
    pub fps: u32,

    /// How long a single read may wait for a frame before it counts as failed.
    pub read_timeout_ms: u64,

    /// Backend used to open devices.
    pub backend: CameraBackendKind,
}

/// Detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionDefaults {
    /// ONNX model file. Without one the pipeline runs with an empty model.
    pub model_path: Option<PathBuf>,

    /// Detections must score strictly above this to be counted.
    pub confidence_threshold: f32,

    /// IoU threshold for non-maximum suppression.
    pub iou_threshold: f32,

    /// Square model input size in pixels.
    pub input_size: u32,

    /// TrueType font used for box labels.
    pub font_path: Option<PathBuf>,
}

/// Capture worker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerDefaults {
    /// Events buffered per subscriber before the oldest are dropped.
    pub publish_capacity: usize,

    /// Frames per FPS measurement window.
    pub fps_window: u32,
}

/// Scheduled snapshot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationDefaults {
    /// Room identifier attached to every snapshot.
    pub location_id: String,

    /// Scheduler polling interval in milliseconds.
    pub tick_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "eduvision=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs_default_data(),
            camera: CameraDefaults::default(),
            detection: DetectionDefaults::default(),
            worker: WorkerDefaults::default(),
            automation: AutomationDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            probe_limit: 5,
            width: 640,
            height: 480,
            fps: 30,
            read_timeout_ms: 2_000,
            backend: CameraBackendKind::Gstreamer,
        }
    }
}

impl Default for DetectionDefaults {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            input_size: 640,
            font_path: None,
        }
    }
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            publish_capacity: 4,
            fps_window: crate::clock::DEFAULT_FPS_WINDOW,
        }
    }
}

impl Default for AutomationDefaults {
    fn default() -> Self {
        Self {
            location_id: "room-101".to_string(),
            tick_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Append-only snapshot log.
    pub fn snapshots_path(&self) -> PathBuf {
        self.data_dir.join("snapshots.jsonl")
    }

    /// Persisted schedule definitions.
    pub fn schedules_path(&self) -> PathBuf {
        self.data_dir.join("schedules.json")
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("eduvision").join("config.json")
}

/// Default data directory.
fn dirs_default_data() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("eduvision")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_targets() {
        let config = AppConfig::default();
        assert_eq!(config.camera.probe_limit, 5);
        assert_eq!((config.camera.width, config.camera.height), (640, 480));
        assert_eq!(config.camera.fps, 30);
        assert!((config.detection.confidence_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.worker.fps_window, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "camera": { "backend": "synthetic", "probe_limit": 2 } }"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.camera.backend, CameraBackendKind::Synthetic);
        assert_eq!(config.camera.probe_limit, 2);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.camera.backend, CameraBackendKind::Gstreamer);
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.automation.location_id = "lab-3".to_string();
        config.detection.font_path = Some(PathBuf::from("/fonts/DejaVuSans.ttf"));
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.automation.location_id, "lab-3");
        assert_eq!(loaded.detection.font_path, config.detection.font_path);
        assert_eq!(loaded.snapshots_path(), loaded.data_dir.join("snapshots.jsonl"));
    }
}
