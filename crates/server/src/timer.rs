//! Re-armable countdown for automatic recordings.
//!
//! The deadline lives in a `watch` channel. Arming replaces it, so the task
//! always waits on the newest deadline and a re-arm never lets the old one
//! fire.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Deadline = Option<Instant>;

/// Owns the countdown task.
pub struct CountdownTimer {
    deadline: Arc<watch::Sender<Deadline>>,
    task: JoinHandle<()>,
}

/// Cheap handle for arming and reading the countdown from any thread.
#[derive(Clone)]
pub struct CountdownHandle {
    deadline: Arc<watch::Sender<Deadline>>,
}

impl CountdownTimer {
    /// Spawn the countdown task. `on_expire` runs on the runtime each time
    /// an armed deadline passes without being replaced.
    pub fn spawn<F>(on_expire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run_countdown(rx, on_expire));
        Self {
            deadline: Arc::new(tx),
            task,
        }
    }

    pub fn handle(&self) -> CountdownHandle {
        CountdownHandle {
            deadline: self.deadline.clone(),
        }
    }

    /// Stop the task once every handle is gone, then wait for it.
    pub async fn shutdown(self) {
        let Self { deadline, task } = self;
        drop(deadline);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Countdown task ended abnormally");
        }
    }
}

impl CountdownHandle {
    /// Start or restart the countdown.
    pub fn arm(&self, duration: Duration) {
        self.deadline.send_replace(Some(Instant::now() + duration));
    }

    pub fn cancel(&self) {
        self.deadline.send_replace(None);
    }

    /// Time left before expiry, or `None` when nothing is pending.
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = (*self.deadline.borrow())?;
        let now = Instant::now();
        (deadline > now).then(|| deadline - now)
    }

    pub fn is_armed(&self) -> bool {
        self.remaining().is_some()
    }
}

async fn run_countdown<F>(mut rx: watch::Receiver<Deadline>, on_expire: F)
where
    F: Fn() + Send + 'static,
{
    let mut fired: Deadline = None;
    loop {
        let deadline = *rx.borrow_and_update();
        match deadline {
            Some(at) if fired != Some(at) => {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep_until(at) => {
                        fired = Some(at);
                        tracing::debug!("Recording countdown expired");
                        on_expire();
                    }
                }
            }
            _ => {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting_timer() -> (CountdownTimer, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let timer = CountdownTimer::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (timer, fired)
    }

    #[tokio::test]
    async fn test_fires_once_after_deadline() {
        let (timer, fired) = counting_timer();
        let handle = timer.handle();
        handle.arm(Duration::from_millis(50));
        assert!(handle.is_armed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!handle.is_armed());
        assert_eq!(handle.remaining(), None);

        drop(handle);
        timer.shutdown().await;
    }

    #[tokio::test]
    async fn test_rearm_pushes_deadline_back() {
        let (timer, fired) = counting_timer();
        let handle = timer.handle();
        handle.arm(Duration::from_millis(150));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.arm(Duration::from_millis(150));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(handle);
        timer.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_prevents_expiry() {
        let (timer, fired) = counting_timer();
        let handle = timer.handle();
        handle.arm(Duration::from_millis(50));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        drop(handle);
        timer.shutdown().await;
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let (timer, _fired) = counting_timer();
        let handle = timer.handle();
        assert_eq!(handle.remaining(), None);
        handle.arm(Duration::from_secs(10));
        let remaining = handle.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));

        drop(handle);
        timer.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_pending_deadline() {
        let (timer, fired) = counting_timer();
        timer.handle().arm(Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(1), timer.shutdown())
            .await
            .expect("countdown task should stop when its sender is dropped");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
