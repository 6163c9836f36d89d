//! Real OS signals delivered to this test process.
//!
//! Kept in its own test binary with a single test: signal registration is
//! process-wide and would race with anything else running here.

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use molt_grace::{
    DrainOutcome, GracefulServer, LifecycleSignal, LifecycleState, OsSignals, ProcessIdentity,
    ServerConfig,
};

fn raise(signal: libc::c_int) {
    let result = unsafe { libc::kill(libc::getpid(), signal) };
    assert_eq!(result, 0);
}

#[tokio::test]
async fn test_os_signals_drive_shutdown() {
    let mut signals = OsSignals::register().unwrap();

    raise(libc::SIGHUP);
    assert_eq!(signals.recv().await, LifecycleSignal::Hangup);

    raise(libc::SIGINT);
    assert_eq!(signals.recv().await, LifecycleSignal::Interrupt);

    let config = ServerConfig::new("127.0.0.1:0", Router::new().route("/", get(|| async { "ok" })))
        .with_shutdown_grace(Duration::from_secs(1));
    let identity = ProcessIdentity::new("/bin/sh", ["sh", "-c", "exit 0"], [("PATH", "/usr/bin:/bin")]);
    let running = GracefulServer::with_identity(config, identity)
        .start()
        .await
        .unwrap();
    let addr = running.local_addr();
    let state = running.state();

    let handle = tokio::spawn(running.run(signals.spawn_forwarder()));
    raise(libc::SIGTERM);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not shut down on SIGTERM")
        .unwrap();
    assert_eq!(outcome, DrainOutcome::Drained);
    assert_eq!(*state.borrow(), LifecycleState::Terminated);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
