//! End-to-end graceful restart against the built `molt-server` binary.
//!
//! Each generation is identified by the pid it reports on `/pid`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

const BIN: &str = env!("CARGO_BIN_EXE_molt-server");
const MARKER: &str = "molt-server_GRACEFUL";

fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn get(addr: &str, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}

fn serving_pid(addr: &str) -> Option<u32> {
    let response = get(addr, "/pid").ok()?;
    let (_, body) = response.split_once("\r\n\r\n")?;
    body.trim().parse().ok()
}

/// Poll `/pid` until a process other than `previous` answers.
fn wait_for_new_pid(addr: &str, previous: Option<u32>) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(pid) = serving_pid(addr) {
            if Some(pid) != previous {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "no new generation started serving");
        sleep(Duration::from_millis(20));
    }
}

/// Poll until every answer comes from `pid`, i.e. the previous generation
/// has drained and closed its listener copy.
fn wait_for_sole_server(addr: &str, pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let answers: Vec<Option<u32>> = (0..10).map(|_| serving_pid(addr)).collect();
        if answers.iter().all(|answer| *answer == Some(pid)) {
            return;
        }
        assert!(Instant::now() < deadline, "old generation still serving");
        sleep(Duration::from_millis(50));
    }
}

fn send(pid: u32, signal: libc::c_int) {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    assert_eq!(result, 0, "kill({pid}) failed");
}

fn wait_for_exit(child: &mut Child) -> std::process::ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        assert!(Instant::now() < deadline, "process did not exit");
        sleep(Duration::from_millis(20));
    }
}

fn start_server(addr: &str) -> Child {
    Command::new(BIN)
        .args([
            "--addr",
            addr,
            "--shutdown-grace-ms",
            "1000",
            "--startup-grace-ms",
            "300",
        ])
        .env_remove(MARKER)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

#[test]
fn test_two_sequential_restarts() {
    let addr = free_addr();
    let mut first = start_server(&addr);

    let pid1 = wait_for_new_pid(&addr, None);
    assert_eq!(pid1, first.id());

    // Generation 1 → 2: the parent drains and exits cleanly.
    send(pid1, libc::SIGHUP);
    let pid2 = wait_for_new_pid(&addr, Some(pid1));
    assert!(wait_for_exit(&mut first).success());
    wait_for_sole_server(&addr, pid2);

    // Generation 2 → 3.
    send(pid2, libc::SIGHUP);
    let pid3 = wait_for_new_pid(&addr, Some(pid2));
    assert_ne!(pid3, pid1);
    wait_for_sole_server(&addr, pid3);

    // Plain shutdown of the last generation releases the port.
    send(pid3, libc::SIGTERM);
    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect(&addr).is_ok() {
        assert!(Instant::now() < deadline, "port still open after SIGTERM");
        sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_bind_failure_exits_non_zero() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let mut server = start_server(&addr);
    let status = wait_for_exit(&mut server);
    assert!(!status.success());
}
