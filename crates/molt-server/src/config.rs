//! Command-line and environment configuration.
//!
//! Every flag falls back to a `MOLT_*` environment variable, so a restart
//! child started with the parent's argv and environment ends up with the
//! same settings.
//!
//! # Examples
//!
//! ```bash
//! molt-server --addr 0.0.0.0:8080 --shutdown-grace-ms 5000
//! MOLT_ADDR=127.0.0.1:9000 MOLT_LOG_FORMAT=json molt-server
//! ```

use std::time::Duration;

use axum::Router;
use clap::{Parser, ValueEnum};
use molt_grace::ServerConfig;
use tracing::info;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Molt demo server running under the graceful restart supervisor.
#[derive(Debug, Clone, Parser)]
#[command(name = "molt-server", version, about)]
pub struct Args {
    /// Address to listen on (host:port)
    #[arg(long, env = "MOLT_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Upper bound on draining in-flight requests, in milliseconds
    #[arg(long, env = "MOLT_SHUTDOWN_GRACE_MS", default_value_t = 800)]
    pub shutdown_grace_ms: u64,

    /// How long the old process keeps serving after spawning its replacement, in milliseconds
    #[arg(long, env = "MOLT_STARTUP_GRACE_MS", default_value_t = 200)]
    pub startup_grace_ms: u64,

    /// Per-request read and handler timeout, in seconds
    #[arg(long, env = "MOLT_IO_TIMEOUT_SECS", default_value_t = 600)]
    pub io_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "MOLT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Build the supervisor config serving `handler`.
    pub fn server_config(&self, handler: Router) -> ServerConfig {
        ServerConfig::new(self.addr.clone(), handler)
            .with_shutdown_grace(self.shutdown_grace())
            .with_startup_grace(self.startup_grace())
            .with_io_timeout(self.io_timeout())
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!("Listen address: {}", self.addr);
        info!("Shutdown grace: {:?}", self.shutdown_grace());
        info!("Startup grace: {:?}", self.startup_grace());
        info!("I/O timeout: {:?}", self.io_timeout());
    }
}
