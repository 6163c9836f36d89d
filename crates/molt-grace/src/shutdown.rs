//! Drain coordination.
//!
//! Two `CancellationToken`s drive the connections: `stop_accepting` ends the
//! accept loop and asks every open connection to finish its current request,
//! `force_close` drops whatever is still open once the grace period is over.
//! `ConnectionGuard`s count the connections still in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight connection finished within the grace period.
    Drained,
    /// The grace period elapsed; `remaining` connections were force-closed.
    TimedOut { remaining: usize },
}

/// Tracks an active connection for drain coordination.
///
/// The controller waits for all `ConnectionGuard`s to drop before
/// considering drain complete.
#[derive(Clone)]
pub struct ConnectionGuard {
    _drop_notifier: Arc<DropNotifier>,
}

struct DropNotifier {
    counter: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for DropNotifier {
    fn drop(&mut self) {
        let prev = self.counter.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Stops the accept loop and waits, bounded, for in-flight connections.
#[derive(Clone)]
pub struct DrainController {
    /// Cancelled when the server should stop accepting new connections.
    stop_accepting: CancellationToken,

    /// Cancelled when the grace period is over.
    force_close: CancellationToken,

    /// Active connection counter.
    connection_count: Arc<AtomicUsize>,

    /// Notified when the last connection drains.
    drain_notify: Arc<Notify>,
}

impl Default for DrainController {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainController {
    pub fn new() -> Self {
        Self {
            stop_accepting: CancellationToken::new(),
            force_close: CancellationToken::new(),
            connection_count: Arc::new(AtomicUsize::new(0)),
            drain_notify: Arc::new(Notify::new()),
        }
    }

    /// Token cancelled when the accept loop should stop.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Token cancelled when remaining connections must be dropped.
    pub fn force_token(&self) -> CancellationToken {
        self.force_close.clone()
    }

    /// Create a `ConnectionGuard` for a new connection.
    ///
    /// Increments the counter on creation, decrements on drop.
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.connection_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            _drop_notifier: Arc::new(DropNotifier {
                counter: Arc::clone(&self.connection_count),
                notify: Arc::clone(&self.drain_notify),
            }),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Stop accepting new connections. Idempotent.
    pub fn stop_accepting(&self) {
        self.stop_accepting.cancel();
    }

    /// Stop accepting and wait up to `grace` for in-flight connections.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.drain_until(Instant::now() + grace).await
    }

    /// Stop accepting and wait until `deadline` for in-flight connections.
    ///
    /// On timeout the force-close token is cancelled and the outcome reports
    /// how many connections were still open.
    pub async fn drain_until(&self, deadline: Instant) -> DrainOutcome {
        self.stop_accepting();

        let active = self.active_connections();
        if active == 0 {
            info!("No active connections, drain complete");
            return DrainOutcome::Drained;
        }

        info!(
            active_connections = active,
            grace_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Draining active connections"
        );

        tokio::select! {
            _ = self.wait_for_drain() => {
                info!("All connections drained cleanly");
                DrainOutcome::Drained
            }
            _ = tokio::time::sleep_until(deadline) => {
                let remaining = self.active_connections();
                warn!(
                    remaining_connections = remaining,
                    "Drain grace period expired, force-closing connections"
                );
                self.force_close.cancel();
                DrainOutcome::TimedOut { remaining }
            }
        }
    }

    async fn wait_for_drain(&self) {
        loop {
            let notified = self.drain_notify.notified();
            tokio::pin!(notified);
            // Register before checking so a guard dropped in between still wakes us.
            notified.as_mut().enable();

            if self.connection_count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
