use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Stdin, Stream::Stdout, Stream::Stderr];

    pub fn fd(self) -> RawFd {
        match self {
            Stream::Stdin => libc::STDIN_FILENO,
            Stream::Stdout => libc::STDOUT_FILENO,
            Stream::Stderr => libc::STDERR_FILENO,
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Stream::Stdin => "--stdin",
            Stream::Stdout => "--stdout",
            Stream::Stderr => "--stderr",
        }
    }
}

/// Which host streams the sandboxed command may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioCaps {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl StdioCaps {
    pub const NONE: StdioCaps = StdioCaps {
        stdin: false,
        stdout: false,
        stderr: false,
    };

    pub const ALL: StdioCaps = StdioCaps {
        stdin: true,
        stdout: true,
        stderr: true,
    };

    pub fn contains(&self, stream: Stream) -> bool {
        match stream {
            Stream::Stdin => self.stdin,
            Stream::Stdout => self.stdout,
            Stream::Stderr => self.stderr,
        }
    }

    pub fn with(mut self, stream: Stream) -> Self {
        match stream {
            Stream::Stdin => self.stdin = true,
            Stream::Stdout => self.stdout = true,
            Stream::Stderr => self.stderr = true,
        }
        self
    }

    pub fn attached(&self) -> impl Iterator<Item = Stream> + '_ {
        Stream::ALL.into_iter().filter(|s| self.contains(*s))
    }

    /// Descriptors the child must not see.
    pub fn detached_fds(&self) -> Vec<RawFd> {
        Stream::ALL
            .into_iter()
            .filter(|s| !self.contains(*s))
            .map(Stream::fd)
            .collect()
    }
}

/// Wires `cmd`'s standard streams to the host's according to `caps`.
///
/// Requested streams are inherited. The rest are closed in the child right
/// before exec, so the command finds those descriptors unavailable rather
/// than pointed at `/dev/null`.
pub fn attach_stdio(cmd: &mut Command, caps: StdioCaps) {
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let detached = caps.detached_fds();
    if detached.is_empty() {
        return;
    }
    // SAFETY: the closure only calls close(2), which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            for fd in &detached {
                libc::close(*fd);
            }
            Ok(())
        });
    }
}
