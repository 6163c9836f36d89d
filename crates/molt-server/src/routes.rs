//! Demo HTTP routes.
//!
//! `/pid` lets an operator (and the restart test) see which generation of
//! the process answered; `/sleep/:ms` holds a request open to observe draining.

use std::time::Duration;

use axum::extract::Path;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Longest sleep `/sleep/:ms` will honour.
const MAX_SLEEP: Duration = Duration::from_secs(60);

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/pid", get(pid))
        .route("/sleep/:ms", get(sleep))
        .layer(TraceLayer::new_for_http())
}

async fn index() -> String {
    format!(
        "molt-server {} (pid {})\n",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    )
}

async fn healthz() -> &'static str {
    "ok"
}

async fn pid() -> String {
    std::process::id().to_string()
}

async fn sleep(Path(ms): Path<u64>) -> String {
    let duration = Duration::from_millis(ms).min(MAX_SLEEP);
    tokio::time::sleep(duration).await;
    format!("slept {}ms\n", duration.as_millis())
}
