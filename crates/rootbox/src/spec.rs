use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use crate::error::{Result, SandboxError};
use crate::stdio::StdioCaps;

/// Everything needed to run one command inside one sandbox.
///
/// A spec is consumed by [`crate::launch`] or [`crate::exec_in_place`];
/// nothing keeps it around after the call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub root: PathBuf,
    pub command: OsString,
    pub args: Vec<OsString>,
    /// `KEY=VALUE` entries. Replaces the inherited environment entirely.
    pub env: Vec<OsString>,
    /// `path` or `source:target`, applied in order.
    pub mounts: Vec<OsString>,
    pub stdio: StdioCaps,
}

impl SandboxSpec {
    pub fn new(root: impl Into<PathBuf>, command: impl Into<OsString>) -> Self {
        Self {
            root: root.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            mounts: Vec::new(),
            stdio: StdioCaps::NONE,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, entry: impl Into<OsString>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn mount(mut self, spec: impl Into<OsString>) -> Self {
        self.mounts.push(spec.into());
        self
    }

    pub fn stdio(mut self, caps: StdioCaps) -> Self {
        self.stdio = caps;
        self
    }

    pub(crate) fn ensure_root_exists(&self) -> Result<()> {
        if !self.root.exists() {
            return Err(SandboxError::RootNotFound(self.root.clone()));
        }
        Ok(())
    }

    /// Splits the env entries into key/value pairs at the first `=`.
    pub(crate) fn env_pairs(&self) -> Result<Vec<(&OsStr, &OsStr)>> {
        self.env.iter().map(|entry| split_env(entry)).collect()
    }
}

fn split_env(entry: &OsStr) -> Result<(&OsStr, &OsStr)> {
    let bytes = entry.as_bytes();
    match bytes.iter().position(|b| *b == b'=') {
        Some(0) | None => Err(SandboxError::InvalidEnv(
            entry.to_string_lossy().into_owned(),
        )),
        Some(idx) => Ok((
            OsStr::from_bytes(&bytes[..idx]),
            OsStr::from_bytes(&bytes[idx + 1..]),
        )),
    }
}

/// How the sandboxed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

impl Termination {
    /// Shell-style exit code: the status itself, or `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            Termination::Exited(code) => *code,
            Termination::Signaled(signal) => 128 + signal,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited(code),
            (None, Some(signal)) => Termination::Signaled(signal),
            (None, None) => Termination::Exited(status.into_raw()),
        }
    }
}

pub(crate) fn root_relative(root: &Path, target: &Path) -> PathBuf {
    let relative = target.strip_prefix("/").unwrap_or(target);
    root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_entries_split_on_first_equals() {
        let spec = SandboxSpec::new("/", "/bin/true")
            .env("PATH=/usr/bin:/bin")
            .env("EXPR=a=b")
            .env("EMPTY=");
        let pairs = spec.env_pairs().expect("pairs");
        assert_eq!(pairs[0], (OsStr::new("PATH"), OsStr::new("/usr/bin:/bin")));
        assert_eq!(pairs[1], (OsStr::new("EXPR"), OsStr::new("a=b")));
        assert_eq!(pairs[2], (OsStr::new("EMPTY"), OsStr::new("")));
    }

    #[test]
    fn env_entries_without_key_are_rejected() {
        for bad in ["NOVALUE", "=value"] {
            let spec = SandboxSpec::new("/", "/bin/true").env(bad);
            let err = spec.env_pairs().expect_err("must reject");
            assert!(err.to_string().contains(bad));
        }
    }

    #[test]
    fn missing_root_is_a_precondition_failure() {
        let spec = SandboxSpec::new("/definitely/not/a/rootfs", "/bin/true");
        let err = spec.ensure_root_exists().expect_err("must fail");
        assert!(matches!(err, SandboxError::RootNotFound(_)));
    }

    #[test]
    fn absolute_targets_stay_under_root() {
        let root = Path::new("/srv/root");
        assert_eq!(
            root_relative(root, Path::new("/mnt/data")),
            PathBuf::from("/srv/root/mnt/data")
        );
        assert_eq!(
            root_relative(root, Path::new("proc")),
            PathBuf::from("/srv/root/proc")
        );
    }

    #[test]
    fn signal_termination_maps_to_shell_code() {
        assert_eq!(Termination::Exited(3).code(), 3);
        assert_eq!(Termination::Signaled(9).code(), 137);
        assert!(Termination::Exited(0).success());
        assert!(!Termination::Signaled(15).success());
    }
}
