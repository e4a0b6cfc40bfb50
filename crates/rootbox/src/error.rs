use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of sandbox failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input detected before any namespace or mount syscall.
    Precondition,
    /// The kernel refused namespace creation or identity mapping.
    Privilege,
    Mount,
    RootSwitch,
    /// The target command (or the re-exec binary) could not be started.
    Execution,
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("root filesystem {} does not exist", .0.display())]
    RootNotFound(PathBuf),

    #[error("invalid mount spec '{0}': expected a full path or source:target")]
    InvalidMount(String),

    #[error("invalid env entry '{0}': expected KEY=VALUE")]
    InvalidEnv(String),

    #[error("argument contains interior NUL: {0}")]
    InteriorNul(String),

    #[error("failed to decode argument token '{token}': {source}")]
    Decode {
        token: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid re-exec arguments: {0}")]
    Protocol(String),

    #[error("failed to create namespaces: {0}")]
    Namespace(#[source] io::Error),

    #[error("failed to write {}: {source}", .path.display())]
    IdMap {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed mounting {} on {}: {source}", .from.display(), .target.display())]
    Mount {
        from: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed switching root to {} ({step}): {source}", .root.display())]
    Pivot {
        root: PathBuf,
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed running the {} command: {source}", .command.to_string_lossy())]
    Exec {
        command: std::ffi::OsString,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A failure raised by the re-executed process on the far side of the
    /// namespace boundary.
    #[error("{message}")]
    Reported { kind: ErrorKind, message: String },
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::RootNotFound(_)
            | SandboxError::InvalidMount(_)
            | SandboxError::InvalidEnv(_)
            | SandboxError::InteriorNul(_)
            | SandboxError::Decode { .. }
            | SandboxError::Protocol(_) => ErrorKind::Precondition,
            SandboxError::Namespace(_) | SandboxError::IdMap { .. } => ErrorKind::Privilege,
            SandboxError::Mount { .. } => ErrorKind::Mount,
            SandboxError::Pivot { .. } => ErrorKind::RootSwitch,
            SandboxError::Exec { .. } | SandboxError::Spawn { .. } => ErrorKind::Execution,
            SandboxError::Reported { kind, .. } => *kind,
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let missing = SandboxError::RootNotFound(PathBuf::from("/nope"));
        assert_eq!(missing.kind(), ErrorKind::Precondition);
        assert!(missing.to_string().contains("/nope"));

        let exec = SandboxError::Exec {
            command: "/does/not/exist".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(exec.kind(), ErrorKind::Execution);
        assert!(exec.to_string().contains("/does/not/exist"));

        let reported = SandboxError::Reported {
            kind: ErrorKind::Mount,
            message: "failed mounting /data".to_string(),
        };
        assert_eq!(reported.kind(), ErrorKind::Mount);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RootSwitch).expect("serialize");
        assert_eq!(json, "\"root_switch\"");
    }
}
