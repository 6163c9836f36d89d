//! Spawning the restart child with the listener at the inherited slot.
//!
//! The child gets the same executable path and argument vector, the parent's
//! environment with exactly one restart marker, and a duplicate of the
//! listening socket at [`INHERITED_FD`]. The parent keeps its own descriptor
//! and keeps serving from it until its drain completes.

use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use tracing::info;

use crate::error::{GraceError, Result};
use crate::identity::ProcessIdentity;
use crate::listener::INHERITED_FD;

/// Launch a new copy of the running executable sharing `listener`.
///
/// stdout and stderr are inherited. On failure the listener is untouched and
/// the caller can keep serving.
pub fn spawn(identity: &ProcessIdentity, listener: &impl AsRawFd) -> Result<Child> {
    let marker = identity.restart_marker();
    let source_fd = listener.as_raw_fd();

    info!(
        exe = %identity.exe().display(),
        fd = source_fd,
        marker = marker.key(),
        "Spawning restart child"
    );

    let mut command = Command::new(identity.exe());
    if let Some((arg0, rest)) = identity.args().split_first() {
        command.arg0(arg0).args(rest);
    }
    command
        .env_clear()
        .envs(marker.apply(identity.env()))
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    // SAFETY: hand_off only calls async-signal-safe fcntl/dup2 and does not
    // allocate.
    unsafe {
        command.pre_exec(move || hand_off(source_fd));
    }

    let child = command.spawn().map_err(|source| GraceError::Spawn {
        exe: identity.exe().to_path_buf(),
        source,
    })?;

    info!(pid = child.id(), "Restart child started");
    Ok(child)
}

/// Runs in the forked child before exec: place the listener at the inherited
/// slot without CLOEXEC.
fn hand_off(fd: RawFd) -> std::io::Result<()> {
    if fd == INHERITED_FD {
        // dup2 onto itself is a no-op and would leave CLOEXEC in place.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    } else if unsafe { libc::dup2(fd, INHERITED_FD) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
