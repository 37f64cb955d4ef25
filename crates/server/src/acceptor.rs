//! TCP acceptor: admits clients, spawns sessions, reclaims finished ones.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camcast_common::config::ServerConfig;
use camcast_common::error::{CamcastError, CamcastResult};
use tokio::net::{TcpListener, TcpSocket};
use tokio::time::timeout;

use crate::registry::{ClientRegistry, ReclaimTotals, SessionHandle};
use crate::session::{ClientSession, SessionTiming};
use crate::state::SharedCaptureState;

const LISTEN_BACKLOG: u32 = 128;
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `failures` consecutive accept errors: doubles from 10 ms,
/// capped at one second.
fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    (ACCEPT_BACKOFF_BASE * (1u32 << doublings)).min(ACCEPT_BACKOFF_MAX)
}

/// Live counters readable while the server runs.
#[derive(Debug, Default)]
pub struct ServerMonitor {
    live_sessions: AtomicUsize,
    accepted: AtomicU64,
    reclaimed: AtomicU64,
}

impl ServerMonitor {
    /// Sessions currently held in the registry, terminated or not.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::SeqCst)
    }
}

/// Resolve the configured bind address and port.
pub fn listen_addr(config: &ServerConfig) -> CamcastResult<SocketAddr> {
    let ip: IpAddr = config.bind_addr.parse().map_err(|e| {
        CamcastError::config(format!("Invalid bind address {:?}: {e}", config.bind_addr))
    })?;
    Ok(SocketAddr::new(ip, config.port))
}

/// Bind with address reuse so a restart does not wait out TIME_WAIT.
pub fn bind_listener(addr: SocketAddr) -> CamcastResult<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .map_err(|e| CamcastError::network(format!("Failed to bind {addr}: {e}")))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| CamcastError::network(format!("Failed to listen on {addr}: {e}")))
}

/// Owns the listener and the client registry.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<SharedCaptureState>,
    registry: ClientRegistry,
    accept_timeout: Duration,
    timing: SessionTiming,
    monitor: Arc<ServerMonitor>,
}

impl Acceptor {
    pub fn bind(state: Arc<SharedCaptureState>, config: &ServerConfig) -> CamcastResult<Self> {
        let listener = bind_listener(listen_addr(config)?)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Listening for clients");

        Ok(Self {
            listener,
            local_addr,
            state,
            registry: ClientRegistry::new(),
            accept_timeout: Duration::from_millis(config.accept_timeout_ms),
            timing: SessionTiming::from(config),
            monitor: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn monitor(&self) -> Arc<ServerMonitor> {
        self.monitor.clone()
    }

    /// Accept clients until shutdown. Finished sessions are reclaimed
    /// whenever a wait for a new connection times out.
    pub async fn accept_until_shutdown(&mut self) {
        let mut accept_failures: u32 = 0;
        while !self.state.is_shutdown() {
            match timeout(self.accept_timeout, self.listener.accept()).await {
                Err(_elapsed) => self.sweep().await,
                Ok(Ok((stream, peer))) => {
                    accept_failures = 0;
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Could not disable Nagle");
                    }
                    let id = self.registry.allocate_id();
                    let session =
                        ClientSession::new(id, peer, stream, self.state.clone(), self.timing);
                    let terminated = session.terminated_flag();
                    let task = tokio::spawn(session.run());
                    self.registry.insert(id, SessionHandle::new(peer, terminated, task));

                    self.monitor.accepted.fetch_add(1, Ordering::SeqCst);
                    self.monitor.live_sessions.store(self.registry.len(), Ordering::SeqCst);
                    tracing::info!(session = id, peer = %peer, live = self.registry.len(), "Client connected");
                }
                Ok(Err(e)) => {
                    accept_failures = accept_failures.saturating_add(1);
                    let backoff = accept_backoff(accept_failures);
                    if accept_failures == 1 {
                        tracing::warn!(error = %e, "Accept failed");
                    } else {
                        tracing::debug!(error = %e, failures = accept_failures, "Accept failed again");
                    }
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        tracing::info!("Acceptor observed shutdown");
    }

    async fn sweep(&mut self) {
        let reclaimed = self.registry.reclaim_terminated().await;
        self.monitor.live_sessions.store(self.registry.len(), Ordering::SeqCst);
        if reclaimed > 0 {
            self.monitor.reclaimed.fetch_add(reclaimed as u64, Ordering::SeqCst);
            tracing::info!(reclaimed, live = self.registry.len(), "Reclaimed finished sessions");
        } else {
            tracing::trace!(live = self.registry.len(), "No finished sessions");
        }
    }

    /// Join every remaining session, then close the listener.
    pub async fn finish(mut self) -> ReclaimTotals {
        let drained = self.registry.drain().await;
        self.monitor.reclaimed.fetch_add(drained as u64, Ordering::SeqCst);
        self.monitor.live_sessions.store(0, Ordering::SeqCst);
        tracing::info!(drained, "All client sessions joined");

        let totals = self.registry.totals();
        drop(self.listener);
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 4099,
            ..ServerConfig::default()
        };
        assert_eq!(listen_addr(&config).unwrap(), "127.0.0.1:4099".parse().unwrap());

        let v6 = ServerConfig {
            bind_addr: "::1".to_string(),
            ..config.clone()
        };
        assert!(listen_addr(&v6).unwrap().is_ipv6());

        let bad = ServerConfig {
            bind_addr: "not-an-ip".to_string(),
            ..config
        };
        assert!(matches!(listen_addr(&bad), Err(CamcastError::Config { .. })));
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
        assert!((1..40).all(|n| accept_backoff(n) <= accept_backoff(n + 1)));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let taken = first.local_addr().unwrap();
        // Address reuse does not allow two live listeners on one port.
        let err = bind_listener(taken).err().unwrap();
        assert!(matches!(err, CamcastError::Network { .. }));
    }
}
