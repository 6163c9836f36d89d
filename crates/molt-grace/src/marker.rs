//! Restart marker carried through the environment.
//!
//! A restart child finds `<executable-base-name>_GRACEFUL=true` in its
//! environment. Keying the variable by the executable's base name keeps
//! differently named servers on the same host from mistaking each other's
//! children for their own.

use std::ffi::{OsStr, OsString};

const MARKER_SUFFIX: &str = "_GRACEFUL";
const MARKER_VALUE: &str = "true";

/// The marker variable for one executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartMarker {
    key: String,
}

impl RestartMarker {
    /// Marker for an executable with the given base name (no directory part).
    pub fn for_executable(base_name: &str) -> Self {
        Self {
            key: format!("{base_name}{MARKER_SUFFIX}"),
        }
    }

    /// The environment variable name, e.g. `molt-server_GRACEFUL`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether `env` carries this marker set to `true`.
    pub fn is_present(&self, env: &[(OsString, OsString)]) -> bool {
        env.iter()
            .any(|(k, v)| k == OsStr::new(&self.key) && v == OsStr::new(MARKER_VALUE))
    }

    /// Build a child environment: every entry of `env` except previous copies
    /// of this marker, followed by exactly one fresh marker.
    pub fn apply(&self, env: &[(OsString, OsString)]) -> Vec<(OsString, OsString)> {
        let mut child_env: Vec<(OsString, OsString)> = env
            .iter()
            .filter(|(k, _)| k != OsStr::new(&self.key))
            .cloned()
            .collect();
        child_env.push((OsString::from(&self.key), OsString::from(MARKER_VALUE)));
        child_env
    }
}

/// Whether a process named `base_name` with environment `env` was spawned as
/// the restart child of a previous instance.
pub fn is_restart_child(base_name: &str, env: &[(OsString, OsString)]) -> bool {
    RestartMarker::for_executable(base_name).is_present(env)
}
