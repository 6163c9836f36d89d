//! Accept loop and per-connection HTTP/1.1 serving.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower::Service;
use tracing::{debug, error, info, warn};

use crate::listener::ListenerHandle;
use crate::shutdown::{ConnectionGuard, DrainController};

/// Spawn the accept loop. It exits as soon as the stop token is cancelled,
/// dropping its listener handle.
pub(crate) fn spawn_accept_loop(
    listener: ListenerHandle,
    handler: Router,
    io_timeout: Duration,
    controller: DrainController,
) -> JoinHandle<()> {
    tokio::spawn(accept_loop(listener, handler, io_timeout, controller))
}

async fn accept_loop(
    listener: ListenerHandle,
    handler: Router,
    io_timeout: Duration,
    controller: DrainController,
) {
    let stop = controller.stop_token();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.listener().accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) if is_connection_error(&e) => continue,
            Err(e) => {
                // Usually EMFILE/ENFILE; back off instead of spinning.
                error!(error = %e, "Accept failed");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                }
            }
        };

        let guard = controller.connection_guard();
        tokio::spawn(serve_connection(
            stream,
            peer,
            handler.clone(),
            io_timeout,
            controller.clone(),
            guard,
        ));
    }

    info!("Stopped accepting new connections");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Router,
    io_timeout: Duration,
    controller: DrainController,
    _guard: ConnectionGuard,
) {
    let stop = controller.stop_token();
    let force = controller.force_token();

    // Set once the first request on this connection reaches the service.
    let first_request = Arc::new(Notify::new());
    let seen_request = Arc::new(AtomicBool::new(false));

    let service = {
        let first_request = Arc::clone(&first_request);
        let seen_request = Arc::clone(&seen_request);
        hyper::service::service_fn(move |request: Request<Incoming>| {
            if !seen_request.swap(true, Ordering::SeqCst) {
                first_request.notify_one();
            }
            handler.clone().call(request)
        })
    };

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new()).header_read_timeout(io_timeout);
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut stopping = false;
    let mut awaiting_first_request = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(%peer, error = %e, "Connection closed with error");
                }
                break;
            }
            _ = stop.cancelled(), if !stopping => {
                stopping = true;
                if seen_request.load(Ordering::SeqCst) {
                    // Finish the in-flight request, then close instead of keeping alive.
                    conn.as_mut().graceful_shutdown();
                } else {
                    // hyper would drop a connection with no request yet as idle.
                    // Serve its first request; the force token bounds the wait.
                    awaiting_first_request = true;
                }
            }
            _ = first_request.notified(), if awaiting_first_request => {
                awaiting_first_request = false;
                conn.as_mut().graceful_shutdown();
            }
            _ = force.cancelled() => {
                warn!(%peer, "Force-closing connection");
                break;
            }
        }
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
