//! The running process's identity, read once at startup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::marker::RestartMarker;

/// Executable path, argument vector and environment of this process.
///
/// The executable path comes from `argv[0]` rather than `/proc/self/exe` so a
/// binary replaced on disk is picked up by the restart child.
#[derive(Debug, Clone)]
pub struct ProcessIdentity {
    exe: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl ProcessIdentity {
    /// Snapshot the current process.
    pub fn current() -> std::io::Result<Self> {
        let args: Vec<OsString> = std::env::args_os().collect();
        let exe = match args.first() {
            Some(arg0) if !arg0.is_empty() => PathBuf::from(arg0),
            _ => std::env::current_exe()?,
        };

        Ok(Self {
            exe,
            args,
            env: std::env::vars_os().collect(),
        })
    }

    /// Build an identity from explicit parts. `args` includes `argv[0]`.
    pub fn new<P, A, K, V>(exe: P, args: A, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        P: Into<PathBuf>,
        A: IntoIterator,
        A::Item: Into<OsString>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            exe: exe.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: env.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    /// Base name of the executable as invoked (`argv[0]`, falling back to the
    /// executable path).
    pub fn base_name(&self) -> String {
        let invoked = self
            .args
            .first()
            .map(Path::new)
            .unwrap_or(self.exe.as_path());

        invoked
            .file_name()
            .or_else(|| self.exe.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The restart marker keyed to this executable.
    pub fn restart_marker(&self) -> RestartMarker {
        RestartMarker::for_executable(&self.base_name())
    }

    /// Whether this process was spawned as a restart child.
    pub fn is_restart_child(&self) -> bool {
        self.restart_marker().is_present(&self.env)
    }
}
