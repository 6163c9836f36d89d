//! Listener acquisition: bind fresh, or inherit the parent's socket at fd 3.
//!
//! The two paths are explicit. A restart child never falls back to binding,
//! since a fresh bind could land on a different port than the one the parent
//! was serving.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::error::{GraceError, Result};

/// The fd slot a parent always places the listening socket at before spawning.
pub const INHERITED_FD: RawFd = 3;

/// The process's listening socket.
///
/// Clones share one underlying socket; it is closed when the accept loop and
/// the supervisor have both dropped their handle.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    inner: Arc<TcpListener>,
}

impl ListenerHandle {
    fn new(listener: TcpListener) -> Self {
        Self {
            inner: Arc::new(listener),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub(crate) fn listener(&self) -> &TcpListener {
        &self.inner
    }
}

impl AsRawFd for ListenerHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Acquire the listener for this process.
///
/// Call once per process. A restart child wraps the socket at
/// [`INHERITED_FD`]; any other process binds `addr`.
pub async fn acquire(addr: &str, restart_child: bool) -> Result<ListenerHandle> {
    acquire_at(addr, restart_child, INHERITED_FD).await
}

pub(crate) async fn acquire_at(addr: &str, restart_child: bool, fd: RawFd) -> Result<ListenerHandle> {
    if restart_child {
        inherit(fd)
    } else {
        bind(addr).await
    }
}

async fn bind(addr: &str) -> Result<ListenerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| GraceError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    let local = listener.local_addr().ok();
    info!(addr, local = ?local, "Bound listener");
    Ok(ListenerHandle::new(listener))
}

fn inherit(fd: RawFd) -> Result<ListenerHandle> {
    if !is_socket(fd) {
        return Err(inherit_error(fd, "no open socket at inherited slot"));
    }
    if !is_listening(fd) {
        return Err(inherit_error(fd, "socket is not listening"));
    }

    // Keep the slot from leaking into unrelated subprocesses; the forker
    // clears the flag again in the restart child it spawns.
    set_cloexec(fd).map_err(|e| inherit_error(fd, e))?;

    // SAFETY: fd was validated as an open listening socket and is owned by
    // nothing else in this process.
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    std_listener
        .set_nonblocking(true)
        .map_err(|e| inherit_error(fd, e))?;

    let listener = TcpListener::from_std(std_listener).map_err(|e| inherit_error(fd, e))?;

    let addr = listener.local_addr().ok();
    info!(fd, addr = ?addr, "Inherited listener from parent process");
    Ok(ListenerHandle::new(listener))
}

fn inherit_error(fd: RawFd, reason: impl ToString) -> GraceError {
    GraceError::Inherit {
        fd,
        reason: reason.to_string(),
    }
}

/// Validate that a file descriptor is an open socket using fstat.
fn is_socket(fd: RawFd) -> bool {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

fn is_listening(fd: RawFd) -> bool {
    let mut accepting: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            &mut accepting as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    result == 0 && accepting != 0
}

fn set_cloexec(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dup_listener(listener: &std::net::TcpListener) -> RawFd {
        let fd = unsafe { libc::dup(listener.as_raw_fd()) };
        assert!(fd >= 0, "dup failed");
        fd
    }

    /// fd inheritance round-trip: bind → dup → inherit → connect.
    #[tokio::test]
    async fn test_inherit_round_trip() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let fd = dup_listener(&listener);

        let handle = acquire_at("127.0.0.1:0", true, fd).await.unwrap();
        assert_eq!(handle.local_addr().unwrap(), addr);

        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());

        drop(listener);
    }

    /// A restart child never binds: an unusable address does not matter.
    #[tokio::test]
    async fn test_restart_child_does_not_bind() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let fd = dup_listener(&listener);

        let handle = acquire_at("not-an-address", true, fd).await.unwrap();
        assert_eq!(handle.local_addr().unwrap(), addr);
    }

    /// Without the marker the inherited slot is never consulted.
    #[tokio::test]
    async fn test_fresh_process_binds() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let inherited_addr = listener.local_addr().unwrap();
        let fd = listener.as_raw_fd();

        let handle = acquire_at("127.0.0.1:0", false, fd).await.unwrap();
        assert_ne!(handle.local_addr().unwrap(), inherited_addr);

        // The listener behind `fd` is untouched.
        assert!(listener.local_addr().is_ok());
    }

    #[tokio::test]
    async fn test_missing_inherited_fd_is_fatal() {
        let err = acquire_at("127.0.0.1:0", true, 9999).await.unwrap_err();
        assert!(matches!(err, GraceError::Inherit { fd: 9999, .. }));
    }

    #[tokio::test]
    async fn test_non_listening_socket_rejected() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);

        let err = acquire_at("127.0.0.1:0", true, fd).await.unwrap_err();
        assert!(matches!(err, GraceError::Inherit { .. }));

        unsafe { libc::close(fd) };
    }

    #[tokio::test]
    async fn test_bind_in_use_is_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = acquire(&addr, false).await.unwrap_err();
        match err {
            GraceError::Bind { addr: failed, source } => {
                assert_eq!(failed, addr);
                assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
            }
            other => panic!("expected bind failure, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_fd_detection() {
        assert!(!is_socket(9999));
        assert!(!is_socket(-1));
    }

    #[test]
    fn test_inherited_listener_is_cloexec() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = dup_listener(&listener);

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);

        set_cloexec(fd).unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);

        unsafe { libc::close(fd) };
    }
}
