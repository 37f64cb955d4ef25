//! Per-client session.
//!
//! Each iteration waits briefly for a control command, applies it, and
//! sends the current derived frame. Frames are sent whether or not a
//! command arrived; the server pushes at its own cadence.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camcast_common::config::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::protocol::{ControlCommand, MAX_COMMAND_BYTES};
use crate::state::SharedCaptureState;

/// Registry key of a session.
pub type SessionId = u64;

/// Session timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Inbound wait per iteration.
    pub poll_timeout: Duration,
    /// Bound on one frame send.
    pub send_timeout: Duration,
}

impl From<&ServerConfig> for SessionTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            poll_timeout: Duration::from_millis(config.client_poll_ms),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    SendFailed,
    SendTimedOut,
    ReadFailed,
}

/// Counters returned when the session task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub commands: u64,
    pub rejected_commands: u64,
    pub end: SessionEnd,
}

/// One connected client.
pub struct ClientSession {
    id: SessionId,
    peer: SocketAddr,
    stream: TcpStream,
    state: Arc<SharedCaptureState>,
    terminated: Arc<AtomicBool>,
    timing: SessionTiming,
    frames_sent: u64,
    bytes_sent: u64,
    commands: u64,
    rejected_commands: u64,
}

impl ClientSession {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        stream: TcpStream,
        state: Arc<SharedCaptureState>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            state,
            terminated: Arc::new(AtomicBool::new(false)),
            timing,
            frames_sent: 0,
            bytes_sent: 0,
            commands: 0,
            rejected_commands: 0,
        }
    }

    /// Flag the session sets when it stops. Only the session writes it.
    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        self.terminated.clone()
    }

    /// Serve the client until failure or shutdown.
    pub async fn run(mut self) -> SessionStats {
        tracing::info!(session = self.id, peer = %self.peer, "Client session started");

        let end = self.serve().await;
        self.terminated.store(true, Ordering::SeqCst);

        let stats = SessionStats {
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            commands: self.commands,
            rejected_commands: self.rejected_commands,
            end,
        };
        tracing::info!(
            session = self.id,
            peer = %self.peer,
            end = ?stats.end,
            frames = stats.frames_sent,
            bytes = stats.bytes_sent,
            commands = stats.commands,
            "Client session ended"
        );
        stats
    }

    async fn serve(&mut self) -> SessionEnd {
        let mut buf = [0u8; MAX_COMMAND_BYTES];
        let mut inbound_open = true;

        while !self.state.is_shutdown() {
            if inbound_open {
                match timeout(self.timing.poll_timeout, self.stream.read(&mut buf)).await {
                    Err(_elapsed) => {}
                    Ok(Ok(0)) => {
                        // The peer may still be reading; keep streaming.
                        tracing::debug!(session = self.id, "Client closed its sending side");
                        inbound_open = false;
                    }
                    Ok(Ok(n)) => self.handle_command(&buf[..n]),
                    Ok(Err(e)) => {
                        tracing::warn!(session = self.id, error = %e, "Client read failed");
                        return SessionEnd::ReadFailed;
                    }
                }
            } else {
                tokio::time::sleep(self.timing.poll_timeout).await;
            }

            let frame = self.state.latest_frame();
            match timeout(self.timing.send_timeout, self.stream.write_all(&frame)).await {
                Ok(Ok(())) => {
                    self.frames_sent += 1;
                    self.bytes_sent += frame.len() as u64;
                }
                Ok(Err(e)) => {
                    tracing::info!(session = self.id, error = %e, "Frame send failed");
                    return SessionEnd::SendFailed;
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        session = self.id,
                        timeout_ms = self.timing.send_timeout.as_millis() as u64,
                        "Frame send timed out"
                    );
                    return SessionEnd::SendTimedOut;
                }
            }
        }
        SessionEnd::Shutdown
    }

    fn handle_command(&mut self, bytes: &[u8]) {
        let command = ControlCommand::parse(bytes);
        tracing::debug!(session = self.id, code = command.code(), "Control command");
        self.commands += 1;
        if let Err(e) = command.apply(&self.state) {
            self.rejected_commands += 1;
            tracing::warn!(session = self.id, code = command.code(), error = %e, "Command rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use camcast_capture::FrameGeometry;
    use tokio::net::TcpListener;

    use super::*;

    const TIMING: SessionTiming = SessionTiming {
        poll_timeout: Duration::from_millis(10),
        send_timeout: Duration::from_secs(1),
    };

    async fn connected_session(
        state: Arc<SharedCaptureState>,
    ) -> (ClientSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        (ClientSession::new(1, peer, server_side, state, TIMING), client)
    }

    fn state() -> Arc<SharedCaptureState> {
        Arc::new(SharedCaptureState::new(FrameGeometry::gray(16, 8), 30.0, Arc::default()).unwrap())
    }

    #[tokio::test]
    async fn test_sends_frames_without_commands() {
        let state = state();
        let (session, mut client) = connected_session(state.clone()).await;
        let task = tokio::spawn(session.run());

        let mut frame = vec![0u8; state.frame_size_bytes()];
        for _ in 0..3 {
            client.read_exact(&mut frame).await.unwrap();
        }

        state.request_shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.end, SessionEnd::Shutdown);
        assert!(stats.frames_sent >= 3);
        assert_eq!(stats.commands, 0);
    }

    #[tokio::test]
    async fn test_applies_command_before_sending() {
        let state = state();
        let (session, mut client) = connected_session(state.clone()).await;
        let terminated = session.terminated_flag();
        let task = tokio::spawn(session.run());

        client.write_all(b"200\n").await.unwrap();
        let mut frame = vec![0u8; state.frame_size_bytes()];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !state.paused() && tokio::time::Instant::now() < deadline {
            client.read_exact(&mut frame).await.unwrap();
        }
        assert!(state.paused());
        assert!(!terminated.load(Ordering::SeqCst));

        state.request_shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.commands, 1);
        assert!(terminated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_client_disconnect_terminates_session() {
        let state = state();
        let (session, client) = connected_session(state.clone()).await;
        let terminated = session.terminated_flag();
        let task = tokio::spawn(session.run());
        drop(client);

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(stats.end, SessionEnd::SendFailed | SessionEnd::ReadFailed));
        assert!(terminated.load(Ordering::SeqCst));
        assert!(!state.is_shutdown());
    }

    #[tokio::test]
    async fn test_half_closed_client_keeps_receiving() {
        let state = state();
        let (session, mut client) = connected_session(state.clone()).await;
        let task = tokio::spawn(session.run());

        client.shutdown().await.unwrap();
        let mut frame = vec![0u8; state.frame_size_bytes()];
        for _ in 0..5 {
            client.read_exact(&mut frame).await.unwrap();
        }

        state.request_shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.end, SessionEnd::Shutdown);
    }

    #[tokio::test]
    async fn test_rejected_rate_is_counted() {
        let state = state();
        let (session, mut client) = connected_session(state.clone()).await;
        let task = tokio::spawn(session.run());

        client.write_all(b"-5\n").await.unwrap();
        let mut frame = vec![0u8; state.frame_size_bytes()];
        for _ in 0..5 {
            client.read_exact(&mut frame).await.unwrap();
        }

        state.request_shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.rejected_commands, 1);
        assert_eq!(state.frame_rate_hz(), 30.0);
    }
}
