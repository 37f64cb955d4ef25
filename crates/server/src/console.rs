//! Operator console on stdin.
//!
//! `t` toggles face detection, `p` pause, `r` manual recording, and `q`
//! requests shutdown. The reader thread is detached: it may stay blocked on
//! stdin after shutdown and dies with the process.

use std::io::BufRead;
use std::sync::Arc;

use crate::protocol::ControlCommand;
use crate::state::SharedCaptureState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Control(ControlCommand),
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "t" => Some(Self::Control(ControlCommand::ToggleFaceDetection)),
            "p" => Some(Self::Control(ControlCommand::TogglePause)),
            "r" => Some(Self::Control(ControlCommand::ToggleManualRecording)),
            "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Apply one console line. Returns `false` once the console should stop.
pub fn handle_line(state: &SharedCaptureState, line: &str) -> bool {
    match ConsoleCommand::parse(line) {
        Some(ConsoleCommand::Control(command)) => {
            if let Err(e) = command.apply(state) {
                tracing::warn!(error = %e, "Console command rejected");
            }
            true
        }
        Some(ConsoleCommand::Quit) => {
            tracing::info!("Shutdown requested from console");
            state.request_shutdown();
            false
        }
        None => {
            if !line.trim().is_empty() {
                tracing::warn!(input = line.trim(), "Unknown console command (t, p, r, q)");
            }
            true
        }
    }
}

/// Start the detached stdin reader.
pub fn spawn_console(state: Arc<SharedCaptureState>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("camcast-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if state.is_shutdown() || !handle_line(&state, &line) {
                    break;
                }
            }
            tracing::debug!("Console reader finished");
        })?;
    Ok(())
}
