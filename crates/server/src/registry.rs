//! Live session bookkeeping, owned by the acceptor.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::session::{SessionId, SessionStats};

/// A spawned session as seen by the acceptor.
pub struct SessionHandle {
    pub peer: SocketAddr,
    pub connected_at: Instant,
    terminated: Arc<AtomicBool>,
    task: JoinHandle<SessionStats>,
}

impl SessionHandle {
    pub fn new(peer: SocketAddr, terminated: Arc<AtomicBool>, task: JoinHandle<SessionStats>) -> Self {
        Self {
            peer,
            connected_at: Instant::now(),
            terminated,
            task,
        }
    }

    /// True once the session flagged itself terminated or its task ended
    /// without doing so (panic or abort).
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst) || self.task.is_finished()
    }
}

/// Totals over every session the registry has reclaimed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimTotals {
    pub sessions: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

/// Maps session ids to their handles.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: HashMap<SessionId, SessionHandle>,
    next_id: SessionId,
    totals: ReclaimTotals,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for the next session. Ids are never reused.
    pub fn allocate_id(&mut self) -> SessionId {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert(&mut self, id: SessionId, handle: SessionHandle) {
        self.sessions.insert(id, handle);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn totals(&self) -> ReclaimTotals {
        self.totals
    }

    /// Join and remove every session that has terminated.
    /// Returns how many were removed.
    pub async fn reclaim_terminated(&mut self) -> usize {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, handle)| handle.is_terminated())
            .map(|(id, _)| *id)
            .collect();

        for id in &finished {
            if let Some(handle) = self.sessions.remove(id) {
                self.join(*id, handle).await;
            }
        }
        finished.len()
    }

    /// Join every session. Used at shutdown after the loops have stopped.
    pub async fn drain(&mut self) -> usize {
        let sessions: Vec<(SessionId, SessionHandle)> = self.sessions.drain().collect();
        let count = sessions.len();
        for (id, handle) in sessions {
            self.join(id, handle).await;
        }
        count
    }

    async fn join(&mut self, id: SessionId, handle: SessionHandle) {
        let SessionHandle {
            peer,
            connected_at,
            task,
            ..
        } = handle;
        match task.await {
            Ok(stats) => {
                self.totals.sessions += 1;
                self.totals.frames_sent += stats.frames_sent;
                self.totals.bytes_sent += stats.bytes_sent;
                tracing::debug!(
                    session = id,
                    peer = %peer,
                    connected_secs = connected_at.elapsed().as_secs(),
                    "Session reclaimed"
                );
            }
            Err(e) => {
                self.totals.sessions += 1;
                tracing::error!(session = id, peer = %peer, error = %e, "Session task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::SessionEnd;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn stats(frames: u64) -> SessionStats {
        SessionStats {
            frames_sent: frames,
            bytes_sent: frames * 10,
            commands: 0,
            rejected_commands: 0,
            end: SessionEnd::SendFailed,
        }
    }

    /// A fake session that terminates when told to.
    fn fake_session(frames: u64) -> (SessionHandle, tokio::sync::oneshot::Sender<()>) {
        let terminated = Arc::new(AtomicBool::new(false));
        let flag = terminated.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = stop_rx.await;
            flag.store(true, Ordering::SeqCst);
            stats(frames)
        });
        (SessionHandle::new(peer(), terminated, task), stop_tx)
    }

    #[test]
    fn test_ids_are_unique() {
        let mut registry = ClientRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_reclaims_only_terminated_sessions() {
        let mut registry = ClientRegistry::new();
        let (first, stop_first) = fake_session(3);
        let (second, _keep_second) = fake_session(5);
        let first_id = registry.allocate_id();
        let second_id = registry.allocate_id();
        registry.insert(first_id, first);
        registry.insert(second_id, second);

        assert_eq!(registry.reclaim_terminated().await, 0);
        assert_eq!(registry.len(), 2);

        stop_first.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.reclaim_terminated().await, 1);
        assert!(!registry.contains(first_id));
        assert!(registry.contains(second_id));
        assert_eq!(registry.totals().sessions, 1);
        assert_eq!(registry.totals().frames_sent, 3);
    }

    #[tokio::test]
    async fn test_reclaims_panicked_session() {
        let mut registry = ClientRegistry::new();
        let blow_up = true;
        let task = tokio::spawn(async move {
            if blow_up {
                panic!("session blew up");
            }
            stats(0)
        });
        let id = registry.allocate_id();
        registry.insert(id, SessionHandle::new(peer(), Arc::default(), task));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.reclaim_terminated().await, 1);
        assert!(registry.is_empty());
        assert_eq!(registry.totals().sessions, 1);
        assert_eq!(registry.totals().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_drain_joins_everything() {
        let mut registry = ClientRegistry::new();
        let mut stops = Vec::new();
        for frames in 1..=3 {
            let (handle, stop) = fake_session(frames);
            let id = registry.allocate_id();
            registry.insert(id, handle);
            stops.push(stop);
        }
        for stop in stops {
            stop.send(()).unwrap();
        }

        assert_eq!(registry.drain().await, 3);
        assert!(registry.is_empty());
        assert_eq!(registry.totals().frames_sent, 6);
        assert_eq!(registry.totals().bytes_sent, 60);
    }
}
