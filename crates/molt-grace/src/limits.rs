//! Open-file limit probe.
//!
//! Every accepted connection costs a descriptor and the accept loop has no
//! concurrency cap of its own, so the NOFILE limit is the effective ceiling.

use rlimit::Resource;

/// Soft and hard `RLIMIT_NOFILE` values. `u64::MAX` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NofileLimit {
    pub soft: u64,
    pub hard: u64,
}

pub fn nofile_limit() -> std::io::Result<NofileLimit> {
    let (soft, hard) = rlimit::getrlimit(Resource::NOFILE)?;
    Ok(NofileLimit { soft, hard })
}
