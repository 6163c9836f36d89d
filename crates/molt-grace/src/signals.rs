//! OS signal registration and forwarding.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{GraceError, Result};

/// Process-control signals the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Hangup,
}

/// What the supervisor does in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Drain and return.
    Shutdown,
    /// Spawn a child sharing the listener, then drain and return.
    Restart,
}

impl LifecycleSignal {
    pub fn action(self) -> LifecycleAction {
        match self {
            LifecycleSignal::Interrupt | LifecycleSignal::Terminate => LifecycleAction::Shutdown,
            LifecycleSignal::Hangup => LifecycleAction::Restart,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LifecycleSignal::Interrupt => "SIGINT",
            LifecycleSignal::Terminate => "SIGTERM",
            LifecycleSignal::Hangup => "SIGHUP",
        }
    }
}

/// Registered handlers for SIGINT, SIGTERM and SIGHUP.
///
/// Once registered, the default action of these signals (terminating the
/// process) no longer applies for the rest of the process lifetime.
pub struct OsSignals {
    sigint: Signal,
    sigterm: Signal,
    sighup: Signal,
}

impl OsSignals {
    /// Register the handlers. Must be called within a Tokio runtime.
    pub fn register() -> Result<Self> {
        Ok(Self {
            sigint: register(SignalKind::interrupt(), "SIGINT")?,
            sigterm: register(SignalKind::terminate(), "SIGTERM")?,
            sighup: register(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> LifecycleSignal {
        tokio::select! {
            _ = self.sigint.recv() => LifecycleSignal::Interrupt,
            _ = self.sigterm.recv() => LifecycleSignal::Terminate,
            _ = self.sighup.recv() => LifecycleSignal::Hangup,
        }
    }

    /// Spawn a task that forwards signals to a channel.
    pub fn spawn_forwarder(mut self) -> mpsc::Receiver<LifecycleSignal> {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            loop {
                let signal = self.recv().await;
                info!(signal = signal.name(), "Received signal");
                if tx.send(signal).await.is_err() {
                    // Receiver dropped, exit
                    break;
                }
            }
        });

        rx
    }
}

fn register(kind: SignalKind, name: &'static str) -> Result<Signal> {
    signal(kind).map_err(|source| GraceError::Signal {
        signal: name,
        source,
    })
}
