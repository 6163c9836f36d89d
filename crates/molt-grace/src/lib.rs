//! # molt-grace
//!
//! Zero-downtime graceful restart for a single listening HTTP server.
//!
//! ## Overview
//!
//! A running server is replaced by a freshly spawned copy of its own
//! executable without closing the listening port:
//! 1. The listener is bound fresh, or inherited at fd 3 when the process was
//!    spawned as a restart child
//! 2. Connections are accepted on a background task, one task per connection
//! 3. On `SIGHUP` a child is spawned with the listener duplicated at fd 3 and
//!    the restart marker in its environment
//! 4. After the startup grace the parent drains in-flight requests (bounded by
//!    the shutdown grace) and exits
//!
//! ## Signal Conventions
//!
//! - `SIGINT`, `SIGTERM`: Graceful shutdown (drain connections, then return)
//! - `SIGHUP`: Graceful restart (spawn child, wait startup grace, drain, return)
//!
//! ## Environment Variables
//!
//! - `<executable-base-name>_GRACEFUL=true`: Set only in restart children
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other platforms.

#[cfg(not(unix))]
compile_error!("molt-grace requires a Unix platform (Linux or macOS)");

mod error;
mod identity;
mod limits;
mod listener;
mod marker;
mod restart;
mod serve;
mod server;
mod shutdown;
mod signals;

pub use error::{GraceError, Result};
pub use identity::ProcessIdentity;
pub use limits::{nofile_limit, NofileLimit};
pub use listener::{acquire, ListenerHandle, INHERITED_FD};
pub use marker::{is_restart_child, RestartMarker};
pub use restart::spawn;
pub use server::{
    listen_and_serve, listen_and_serve_with_timeout, GracefulServer, LifecycleState,
    RunningServer, ServerConfig, DEFAULT_IO_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_STARTUP_GRACE,
};
pub use shutdown::{ConnectionGuard, DrainController, DrainOutcome};
pub use signals::{LifecycleAction, LifecycleSignal, OsSignals};
