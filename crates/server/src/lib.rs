//! camcast Streaming Server
//!
//! One capture loop produces a derived grayscale frame into shared state.
//! Any number of TCP clients receive that frame at their own cadence and
//! steer the server with short integer commands. A recording loop appends
//! frames to a video file while recording is active.
//!
//! # Tasks
//!
//! ```text
//!             ┌──────────────┐  publish   ┌────────────────────┐
//!  source ──▶ │ CaptureLoop  │ ─────────▶ │ SharedCaptureState │ ◀── commands ──┐
//!             └──────┬───────┘            └─────────┬──────────┘                │
//!                    │ arm                          │ latest frame              │
//!             ┌──────▼───────┐            ┌─────────▼──────────┐       ┌────────┴──────┐
//!             │CountdownTimer│            │   RecordingLoop    │       │ ClientSession │ ×N
//!             └──────────────┘            └────────────────────┘       └────────▲──────┘
//!                                                                          spawn│
//!                                                                      ┌────────┴──────┐
//!                                                                      │   Acceptor    │
//!                                                                      └───────────────┘
//! ```

pub mod acceptor;
pub mod capture_loop;
pub mod console;
pub mod protocol;
pub mod recording;
pub mod registry;
pub mod server;
pub mod session;
pub mod signals;
pub mod state;
pub mod timer;

pub use acceptor::{Acceptor, ServerMonitor};
pub use capture_loop::{CaptureLoop, CaptureStats};
pub use protocol::{parse_code, ControlCommand};
pub use recording::{RecordingLoop, RecordingStats, SinkOpener};
pub use registry::ClientRegistry;
pub use server::{Collaborators, ServerReport, StreamServer};
pub use session::{ClientSession, SessionStats};
pub use state::{SharedCaptureState, StateSnapshot};
pub use timer::{CountdownHandle, CountdownTimer};
