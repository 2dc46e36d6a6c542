//! Connectivity reporting.
//!
//! The engine consults a [`NetworkMonitor`] before attempting remote writes,
//! so a doomed attempt is skipped entirely while offline. The minimal
//! contract is a point-in-time check; monitors may additionally expose a
//! change stream, which unlocks the engine's reconnect-triggered retry pass.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;

/// Reports current connectivity.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Point-in-time connectivity check. Implementations that probe the
    /// network must report a failed or timed-out probe as disconnected.
    async fn is_connected(&self) -> bool;

    /// Optional push-style connectivity transitions. `None` when the monitor
    /// cannot observe changes.
    fn changes(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Monitor backed by a watch channel, driven by the host platform's
/// reachability callbacks (or by tests).
pub struct SharedMonitor {
    state: watch::Sender<bool>,
}

impl SharedMonitor {
    pub fn new(connected: bool) -> Self {
        let (state, _) = watch::channel(connected);
        Self { state }
    }

    /// Record a connectivity transition.
    pub fn set_connected(&self, connected: bool) {
        self.state.send_replace(connected);
    }
}

#[async_trait]
impl NetworkMonitor for SharedMonitor {
    async fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn changes(&self) -> Option<watch::Receiver<bool>> {
        Some(self.state.subscribe())
    }
}

type ProbeFuture = Pin<Box<dyn Future<Output = Result<bool, String>> + Send>>;

/// Monitor that runs a caller-supplied reachability probe under a timeout.
/// A probe error or timeout reads as disconnected, the conservative answer.
pub struct ProbeMonitor {
    probe: Box<dyn Fn() -> ProbeFuture + Send + Sync>,
    timeout: Duration,
}

impl ProbeMonitor {
    pub fn new(
        probe: impl Fn() -> ProbeFuture + Send + Sync + 'static,
        timeout: Duration,
    ) -> Self {
        Self {
            probe: Box::new(probe),
            timeout,
        }
    }
}

#[async_trait]
impl NetworkMonitor for ProbeMonitor {
    async fn is_connected(&self) -> bool {
        match tokio::time::timeout(self.timeout, (self.probe)()).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(_)) | Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_monitor_reports_transitions() {
        let monitor = SharedMonitor::new(false);
        assert!(!monitor.is_connected().await);

        monitor.set_connected(true);
        assert!(monitor.is_connected().await);
    }

    #[tokio::test]
    async fn shared_monitor_pushes_changes() {
        let monitor = SharedMonitor::new(false);
        let mut changes = monitor.changes().unwrap();

        monitor.set_connected(true);
        changes.changed().await.unwrap();
        assert!(*changes.borrow_and_update());
    }

    #[tokio::test]
    async fn probe_success_is_reported() {
        let monitor = ProbeMonitor::new(
            || Box::pin(async { Ok(true) }),
            Duration::from_millis(100),
        );
        assert!(monitor.is_connected().await);
    }

    #[tokio::test]
    async fn probe_error_reads_as_disconnected() {
        let monitor = ProbeMonitor::new(
            || Box::pin(async { Err("dns failure".to_string()) }),
            Duration::from_millis(100),
        );
        assert!(!monitor.is_connected().await);
    }

    #[tokio::test]
    async fn probe_timeout_reads_as_disconnected() {
        let monitor = ProbeMonitor::new(
            || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(true)
                })
            },
            Duration::from_millis(10),
        );
        assert!(!monitor.is_connected().await);
    }
}
