//! camcast Capture Collaborators
//!
//! Everything the streaming server treats as opaque: where frames come
//! from, how faces are detected, how status text is drawn, and where
//! recorded frames go. The server depends only on the traits; concrete
//! implementations are picked from configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   RgbImage   ┌──────────────┐   GrayImage   ┌───────────┐
//! │ FrameSource │ ───────────▶ │ FaceDetector │ ────────────▶ │ Annotator │
//! │ camera/test │              │ (annotates)  │  derive_gray  │ (overlay) │
//! └─────────────┘              └──────────────┘               └─────┬─────┘
//!                                                                   │ bytes
//!                                                                   ▼
//!                                                  clients / VideoSink (MJPG AVI)
//! ```

pub mod detect;
pub mod frame;
pub mod overlay;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use detect::{select_detector, BrightBlobDetector, FaceDetector, NoopDetector, ScriptedDetector};
pub use frame::{derive_gray, FrameGeometry};
pub use overlay::{Annotator, OverlayStatus, RecordingBadge};
pub use sink::{open_video_sink, GstVideoSink, MemoryRecording, MemorySink, VideoSink};
pub use source::{select_source, FrameSource, GstCameraSource, TestPatternSource};
