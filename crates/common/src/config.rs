//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CamcastError, CamcastResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listening endpoint and per-client timing.
    pub server: ServerConfig,

    /// Frame acquisition settings.
    pub capture: CaptureConfig,

    /// Recording trigger and sink settings.
    pub recording: RecordingConfig,

    /// Overlay rendering settings.
    pub overlay: OverlayConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Listening endpoint and timing of the accept and session loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, e.g. "0.0.0.0".
    pub bind_addr: String,

    /// TCP port.
    pub port: u16,

    /// How long the acceptor waits for a connection before sweeping the registry.
    pub accept_timeout_ms: u64,

    /// How long a session waits for inbound control bytes per iteration.
    pub client_poll_ms: u64,

    /// Upper bound on a single frame send before the session gives up.
    pub send_timeout_ms: u64,
}

/// Which frame source to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// A V4L2 camera through GStreamer.
    Camera,
    /// Synthetic moving pattern, no hardware required.
    TestPattern,
}

/// Which detector backs the face-detection toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Never reports a face.
    None,
    /// Reports a face when a large bright region is present.
    BrightBlob,
}

/// Frame acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,

    /// Camera device node (camera source only).
    pub device: String,

    /// Width of the derived frame sent to clients.
    pub width: u32,

    /// Height of the derived frame sent to clients.
    pub height: u32,

    /// Bytes per pixel of the derived frame. Only single-channel grayscale is supported.
    pub channels: u32,

    /// Initial capture rate in Hz.
    pub frame_rate_hz: f64,

    pub detector: DetectorKind,
}

/// Recording trigger and sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Seconds to keep recording after the last new face detection.
    pub duration_secs: u64,

    /// Directory receiving `video_recording_<HH:MM:SS>.avi` files.
    pub output_dir: PathBuf,

    /// Four-character codec code of the sink.
    pub fourcc: String,

    /// Open a new sink every time recording starts instead of once per process.
    pub reopen_per_session: bool,
}

/// Largest accepted `overlay.font_scale`, in pixels.
pub const MAX_FONT_SCALE: f32 = 256.0;

/// Overlay rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font used for text. Well-known system fonts are tried when unset.
    pub font_path: Option<PathBuf>,

    /// Glyph height in pixels.
    pub font_scale: f32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "camcast_server=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 4099,
            accept_timeout_ms: 2500,
            client_poll_ms: 30,
            send_timeout_ms: 5000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera,
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            channels: 1,
            frame_rate_hz: 30.0,
            detector: DetectorKind::None,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            output_dir: PathBuf::from("."),
            fourcc: "MJPG".to_string(),
            reopen_per_session: false,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_scale: 16.0,
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
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path. Errors are not swallowed.
    pub fn load_from(path: &Path) -> CamcastResult<Self> {
        if !path.exists() {
            return Err(CamcastError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> CamcastResult<()> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(CamcastError::config(format!(
                "Frame dimensions must be non-zero, got {}x{}",
                capture.width, capture.height
            )));
        }
        if capture.channels != 1 {
            return Err(CamcastError::config(format!(
                "Only single-channel frames are supported, got {} channels",
                capture.channels
            )));
        }
        if !(capture.frame_rate_hz.is_finite() && capture.frame_rate_hz > 0.0) {
            return Err(CamcastError::config(format!(
                "Frame rate must be positive, got {}",
                capture.frame_rate_hz
            )));
        }

        let server = &self.server;
        if server.accept_timeout_ms == 0 || server.client_poll_ms == 0 || server.send_timeout_ms == 0
        {
            return Err(CamcastError::config("Server timeouts must be non-zero"));
        }

        let font_scale = self.overlay.font_scale;
        if !(font_scale > 0.0 && font_scale <= MAX_FONT_SCALE) {
            return Err(CamcastError::config(format!(
                "Overlay font scale must be in (0, {MAX_FONT_SCALE}], got {font_scale}"
            )));
        }

        if self.recording.duration_secs == 0 {
            return Err(CamcastError::config("Record duration must be at least 1s"));
        }
        if self.recording.fourcc.len() != 4 {
            return Err(CamcastError::config(format!(
                "fourcc must be four characters, got {:?}",
                self.recording.fourcc
            )));
        }
        Ok(())
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
    base.join("camcast").join("config.json")
}
