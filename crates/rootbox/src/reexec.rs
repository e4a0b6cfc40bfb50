//! Receiving side of the re-exec protocol.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{FromRawFd, RawFd};
use tracing::error;

use crate::error::{ErrorKind, SandboxError};
use crate::exec::exec_in_place;
use crate::protocol::parse_spec;

/// Exit code of a sandbox that failed before or while starting its command.
pub const INFRASTRUCTURE_EXIT_CODE: i32 = 125;

/// Descriptor the launcher passes the failure report pipe on.
pub const REPORT_FD: RawFd = 3;
pub const REPORT_FD_ENV: &str = "ROOTBOX_REPORT_FD";

/// What the re-executed process tells the launcher when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SandboxError> for ErrorReport {
    fn from(err: &SandboxError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<ErrorReport> for SandboxError {
    fn from(report: ErrorReport) -> Self {
        SandboxError::Reported {
            kind: report.kind,
            message: report.message,
        }
    }
}

/// Entry point for a process started with the `exec` marker. `raw` holds
/// the arguments after the marker. Returns the exit code to terminate with.
pub fn run<I>(raw: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let mut report = take_report_channel();

    match parse_spec(raw).and_then(exec_in_place) {
        Ok(termination) => termination.code(),
        Err(err) => {
            error!(kind = ?err.kind(), "{err}");
            if let Some(channel) = report.as_mut() {
                send_report(channel, &err);
            }
            INFRASTRUCTURE_EXIT_CODE
        }
    }
}

fn send_report(channel: &mut impl Write, err: &SandboxError) {
    let report = ErrorReport::from(err);
    let written = serde_json::to_writer(&mut *channel, &report)
        .map_err(std::io::Error::from)
        .and_then(|()| channel.flush());
    if let Err(write_err) = written {
        error!(error = %write_err, "failed to send failure report");
    }
}

/// Claims the report descriptor announced in the environment, marking it
/// close-on-exec so the target command never inherits it.
fn take_report_channel() -> Option<File> {
    let fd: RawFd = std::env::var(REPORT_FD_ENV).ok()?.parse().ok()?;
    // SAFETY: F_GETFD/F_SETFD only inspect and flag the descriptor.
    unsafe {
        if libc::fcntl(fd, libc::F_GETFD) < 0 {
            return None;
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return None;
        }
    }
    // SAFETY: the launcher opened this descriptor for us alone; nothing else
    // in this process owns it.
    Some(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn report_roundtrips_into_typed_error() {
        let err = SandboxError::Exec {
            command: "/does/not/exist".into(),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        let mut buf = Vec::new();
        send_report(&mut buf, &err);

        let report: ErrorReport = serde_json::from_slice(&buf).expect("parse");
        let back = SandboxError::from(report);
        assert_eq!(back.kind(), ErrorKind::Execution);
        assert!(back.to_string().contains("/does/not/exist"));
    }

    #[test]
    fn report_json_shape() {
        let err = SandboxError::RootNotFound(PathBuf::from("/nope"));
        let report = ErrorReport::from(&err);
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["kind"], "precondition");
        assert_eq!(json["message"], "root filesystem /nope does not exist");
    }

    #[test]
    fn bad_invocation_exits_with_infrastructure_code() {
        let code = run(vec![OsString::from("--entrypoint"), OsString::from("/bin/true")]);
        assert_eq!(code, INFRASTRUCTURE_EXIT_CODE);

        let code = run(vec![
            OsString::from("--rootfs"),
            OsString::from("/no/such/root"),
            OsString::from("--entrypoint"),
            OsString::from("/bin/true"),
        ]);
        assert_eq!(code, INFRASTRUCTURE_EXIT_CODE);
    }
}
