//! The supervisor: acquire the listener, serve, route signals, drain.

use std::future::Future;
use std::net::SocketAddr;
use std::process::{Child, ExitStatus};
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::identity::ProcessIdentity;
use crate::limits::nofile_limit;
use crate::listener::{self, ListenerHandle};
use crate::restart;
use crate::serve;
use crate::shutdown::{DrainController, DrainOutcome};
use crate::signals::{LifecycleAction, LifecycleSignal, OsSignals};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(800);
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(200);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Server settings. Immutable once the server is built from it.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    addr: String,
    handler: Router,
    shutdown_grace: Duration,
    startup_grace: Duration,
    io_timeout: Duration,
}

impl ServerConfig {
    /// Config with the default grace periods and I/O timeout.
    pub fn new(addr: impl Into<String>, handler: Router) -> Self {
        Self {
            addr: addr.into(),
            handler,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            startup_grace: DEFAULT_STARTUP_GRACE,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Upper bound on the drain of in-flight requests.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// How long the parent keeps serving after spawning a restart child.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Per-request read and handler timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn startup_grace(&self) -> Duration {
        self.startup_grace
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Serving,
    Draining,
    Terminated,
}

/// A server that has not acquired its listener yet.
pub struct GracefulServer {
    config: ServerConfig,
    identity: ProcessIdentity,
    restart_child: bool,
    state: watch::Sender<LifecycleState>,
}

impl GracefulServer {
    /// Build a server for the current process.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Ok(Self::with_identity(config, ProcessIdentity::current()?))
    }

    /// Build a server with an explicit process identity. The restart marker
    /// is evaluated here, once.
    pub fn with_identity(config: ServerConfig, identity: ProcessIdentity) -> Self {
        let restart_child = identity.is_restart_child();
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            config,
            identity,
            restart_child,
            state,
        }
    }

    pub fn is_restart_child(&self) -> bool {
        self.restart_child
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve until SIGINT/SIGTERM, or until a SIGHUP restart hands over to
    /// a child, then drain.
    pub async fn listen_and_serve(self) -> Result<DrainOutcome> {
        let signals = OsSignals::register()?;
        let running = self.start().await?;
        Ok(running.run(signals.spawn_forwarder()).await)
    }

    /// Acquire the listener and launch the accept loop.
    pub async fn start(self) -> Result<RunningServer> {
        match nofile_limit() {
            Ok(limit) => info!(soft = limit.soft, hard = limit.hard, "Open file limit"),
            Err(e) => warn!(error = %e, "Could not read open file limit"),
        }

        let listener = listener::acquire(&self.config.addr, self.restart_child).await?;
        let local_addr = listener.local_addr()?;

        let controller = DrainController::new();
        let handler = self.config.handler.clone().layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            self.config.io_timeout,
        ));
        let accept_task = serve::spawn_accept_loop(
            listener.clone(),
            handler,
            self.config.io_timeout,
            controller.clone(),
        );

        self.state.send_replace(LifecycleState::Serving);
        info!(
            addr = %local_addr,
            pid = std::process::id(),
            restart_child = self.restart_child,
            "Serving"
        );

        Ok(RunningServer {
            config: self.config,
            identity: self.identity,
            listener,
            local_addr,
            controller,
            accept_task,
            state: self.state,
        })
    }
}

/// A server whose accept loop is running.
pub struct RunningServer {
    config: ServerConfig,
    identity: ProcessIdentity,
    listener: ListenerHandle,
    local_addr: SocketAddr,
    controller: DrainController,
    accept_task: JoinHandle<()>,
    state: watch::Sender<LifecycleState>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn active_connections(&self) -> usize {
        self.controller.active_connections()
    }

    /// Route signals until one shutdown or successful restart has been
    /// handled, then drain.
    ///
    /// A failed spawn keeps the server running and waits for the next
    /// signal. Signals arriving after the decision to drain are logged and
    /// ignored. A closed channel counts as shutdown.
    pub async fn run(self, mut signals: mpsc::Receiver<LifecycleSignal>) -> DrainOutcome {
        loop {
            let Some(signal) = signals.recv().await else {
                warn!("Signal channel closed, shutting down");
                break;
            };

            match signal.action() {
                LifecycleAction::Shutdown => {
                    info!(signal = signal.name(), "Initiating graceful shutdown");
                    break;
                }
                LifecycleAction::Restart => {
                    info!(signal = signal.name(), "Initiating graceful restart");
                    match restart::spawn(&self.identity, &self.listener) {
                        Ok(mut child) => {
                            info!(
                                child_pid = child.id(),
                                startup_grace_ms = self.config.startup_grace.as_millis() as u64,
                                "Waiting for restart child to start serving"
                            );
                            let startup = tokio::time::sleep(self.config.startup_grace);
                            ignore_signals_during(startup, &mut signals).await;
                            check_restart_child(&mut child);
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Start new process failed, please retry");
                        }
                    }
                }
            }
        }

        let grace = self.config.shutdown_grace;
        ignore_signals_during(self.drain(grace), &mut signals).await
    }

    /// Stop accepting, wait up to `grace` for in-flight requests, then close
    /// the listener. Returns within `grace`.
    pub async fn drain(mut self, grace: Duration) -> DrainOutcome {
        let deadline = Instant::now() + grace;
        self.state.send_replace(LifecycleState::Draining);
        info!(
            grace_ms = grace.as_millis() as u64,
            active_connections = self.controller.active_connections(),
            "Draining"
        );

        // Once the accept loop has exited every accepted connection holds a guard.
        self.controller.stop_accepting();
        match tokio::time::timeout_at(deadline, &mut self.accept_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Accept loop task failed"),
            Err(_) => {
                warn!("Accept loop did not stop before the drain deadline");
                self.accept_task.abort();
            }
        }

        let outcome = self.controller.drain_until(deadline).await;

        drop(self.listener);
        self.state.send_replace(LifecycleState::Terminated);
        info!(outcome = ?outcome, addr = %self.local_addr, "Listener closed");
        outcome
    }
}

/// Reap the restart child if it already exited during the startup grace.
///
/// The drain goes ahead either way; an early exit only shows up in the logs.
fn check_restart_child(child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => {
            error!(
                child_pid = child.id(),
                status = %status,
                "Restart child exited during startup grace, draining anyway"
            );
            Some(status)
        }
        Ok(None) => {
            info!(child_pid = child.id(), "Restart child still running");
            None
        }
        Err(e) => {
            warn!(child_pid = child.id(), error = %e, "Could not check restart child status");
            None
        }
    }
}

async fn ignore_signals_during<F: Future>(
    fut: F,
    signals: &mut mpsc::Receiver<LifecycleSignal>,
) -> F::Output {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return output,
            Some(signal) = signals.recv() => {
                warn!(signal = signal.name(), "Restart or shutdown already in progress, ignoring signal");
            }
        }
    }
}

/// Serve `handler` on `addr` with the default grace periods and I/O timeout.
pub async fn listen_and_serve(addr: impl Into<String>, handler: Router) -> Result<DrainOutcome> {
    GracefulServer::new(ServerConfig::new(addr, handler))?
        .listen_and_serve()
        .await
}

/// Serve `handler` on `addr` with explicit grace periods and I/O timeout.
pub async fn listen_and_serve_with_timeout(
    addr: impl Into<String>,
    handler: Router,
    shutdown_grace: Duration,
    startup_grace: Duration,
    io_timeout: Duration,
) -> Result<DrainOutcome> {
    let config = ServerConfig::new(addr, handler)
        .with_shutdown_grace(shutdown_grace)
        .with_startup_grace(startup_grace)
        .with_io_timeout(io_timeout);
    GracefulServer::new(config)?.listen_and_serve().await
}
