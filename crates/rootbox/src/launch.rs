//! Starts a fresh copy of the current binary inside new namespaces.
//!
//! ```text
//! launcher                               clone child (new ns set)
//!   clone(NEWNS|NEWUTS|NEWIPC|NEWPID|NEWNET|NEWUSER)
//!   write setgroups, uid_map, gid_map       blocks on ready pipe
//!   write ready byte ------------------->  dup report pipe to fd 3
//!                                           execve(program, "exec" ...)
//!   read exec-error pipe  <-------------  errno, only if execve failed
//!   read report pipe      <-------------  ErrorReport, only on failure
//!   waitpid
//! ```

use nix::sched::{CloneCb, CloneFlags};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Gid, Pid, Uid};
use std::ffi::{CString, OsStr};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::mounts::HostMount;
use crate::protocol::reexec_argv;
use crate::reexec::{ErrorReport, REPORT_FD, REPORT_FD_ENV};
use crate::spec::{SandboxSpec, Termination};

const DEFAULT_PROGRAM: &str = "/proc/self/exe";
const STACK_SIZE: usize = 1024 * 1024;
/// Pipe descriptors are moved at or above this number so none of them can
/// collide with stdio or the report descriptor in the child.
const MIN_PRIVATE_FD: RawFd = 10;

const CHILD_SETUP_FAILED: isize = 126;
const CHILD_EXEC_FAILED: isize = 127;

/// One line of a `uid_map`/`gid_map` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl IdMap {
    /// Maps container id 0 to `host_id`, and nothing else.
    pub fn root_to(host_id: u32) -> Self {
        Self {
            container_id: 0,
            host_id,
            size: 1,
        }
    }
}

impl fmt::Display for IdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// The uid and gid mapping for a new user namespace. Each holds exactly
/// one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMappings {
    uid: IdMap,
    gid: IdMap,
}

impl IdMappings {
    /// Root inside the namespace is the caller's real uid/gid outside it.
    pub fn current_user() -> Self {
        Self::root_as(Uid::current(), Gid::current())
    }

    pub fn root_as(uid: Uid, gid: Gid) -> Self {
        Self {
            uid: IdMap::root_to(uid.as_raw()),
            gid: IdMap::root_to(gid.as_raw()),
        }
    }

    pub fn uid(&self) -> IdMap {
        self.uid
    }

    pub fn gid(&self) -> IdMap {
        self.gid
    }

    fn write_for(&self, pid: Pid) -> Result<()> {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));

        // Unprivileged gid_map writes require setgroups to be denied first.
        // Older kernels have no setgroups file at all.
        if let Err(err) = fs::write(proc_dir.join("setgroups"), "deny\n") {
            debug!(%pid, error = %err, "could not deny setgroups");
        }
        write_map(&proc_dir.join("uid_map"), self.uid)?;
        write_map(&proc_dir.join("gid_map"), self.gid)
    }
}

fn write_map(path: &Path, map: IdMap) -> Result<()> {
    fs::write(path, format!("{map}\n")).map_err(|source| SandboxError::IdMap {
        path: path.to_path_buf(),
        source,
    })
}

/// The namespace set every launched sandbox gets, requested in one `clone`.
pub fn namespace_flags() -> CloneFlags {
    CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWUSER
}

#[derive(Debug, Clone)]
pub struct Launcher {
    program: PathBuf,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
        }
    }
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-executes `program` instead of the running binary. The program must
    /// dispatch the `exec` marker to [`crate::reexec::run`].
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `spec` in new namespaces and blocks until it finishes.
    pub fn launch(&self, spec: SandboxSpec) -> Result<Termination> {
        spec.ensure_root_exists()?;
        HostMount::parse_all(&spec.mounts)?;
        spec.env_pairs()?;

        let plan = ExecPlan::build(&self.program, &spec)?;
        let mappings = IdMappings::current_user();
        let spawn_error = |source| SandboxError::Spawn {
            program: self.program.clone(),
            source,
        };

        let (ready_read, ready_write) = private_pipe().map_err(spawn_error)?;
        let (report_read, report_write) = private_pipe().map_err(spawn_error)?;
        let (exec_error_read, exec_error_write) = private_pipe().map_err(spawn_error)?;
        let fds = ChildFds {
            ready_read: ready_read.as_raw_fd(),
            ready_write: ready_write.as_raw_fd(),
            report_write: report_write.as_raw_fd(),
            exec_error_write: exec_error_write.as_raw_fd(),
        };

        let mut stack = vec![0u8; STACK_SIZE];
        // SAFETY: the child only touches pre-built buffers and issues
        // async-signal-safe syscalls before execve.
        let child_main: CloneCb<'_> = Box::new(|| unsafe { child_entry(&fds, &plan) });
        let pid = unsafe {
            nix::sched::clone(child_main, &mut stack, namespace_flags(), Some(libc::SIGCHLD))
        }
        .map_err(|errno| SandboxError::Namespace(errno.into()))?;
        info!(
            %pid,
            root = %spec.root.display(),
            command = %spec.command.to_string_lossy(),
            "sandbox launched"
        );

        drop(ready_read);
        drop(report_write);
        drop(exec_error_write);

        if let Err(err) = mappings.write_for(pid) {
            // Closing the ready pipe unblocks the child, which then exits.
            drop(ready_write);
            let _ = reap(pid);
            return Err(err);
        }
        if let Err(err) = File::from(ready_write).write_all(&[1]) {
            let _ = reap(pid);
            return Err(spawn_error(err));
        }

        let mut errno = Vec::new();
        File::from(exec_error_read)
            .read_to_end(&mut errno)
            .map_err(spawn_error)?;
        if let Ok(raw) = <[u8; 4]>::try_from(errno.as_slice()) {
            let _ = reap(pid);
            return Err(spawn_error(io::Error::from_raw_os_error(i32::from_ne_bytes(raw))));
        }

        let mut report = Vec::new();
        File::from(report_read)
            .read_to_end(&mut report)
            .map_err(spawn_error)?;
        let termination = reap(pid).map_err(spawn_error)?;

        if !report.is_empty() {
            let report: ErrorReport = serde_json::from_slice(&report).map_err(|err| {
                SandboxError::Protocol(format!("unreadable failure report: {err}"))
            })?;
            return Err(report.into());
        }
        info!(%pid, code = termination.code(), "sandbox exited");
        Ok(termination)
    }
}

/// Shorthand for `Launcher::new().launch(spec)`.
pub fn launch(spec: SandboxSpec) -> Result<Termination> {
    Launcher::new().launch(spec)
}

fn reap(pid: Pid) -> io::Result<Termination> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Termination::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(Termination::Signaled(signal as i32));
            }
            Ok(_) | Err(nix::errno::Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
}

/// A close-on-exec pipe whose ends sit at or above [`MIN_PRIVATE_FD`].
fn private_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;
    Ok((raise(read)?, raise(write)?))
}

fn raise(fd: OwnedFd) -> io::Result<OwnedFd> {
    // SAFETY: fd is open for the duration of the call; the duplicate is a
    // new descriptor we take ownership of.
    let raised = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, MIN_PRIVATE_FD) };
    if raised < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raised) })
}

struct ChildFds {
    ready_read: RawFd,
    ready_write: RawFd,
    report_write: RawFd,
    exec_error_write: RawFd,
}

/// Everything `execve` needs, allocated before `clone`.
struct ExecPlan {
    program: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    envp_ptrs: Vec<*const libc::c_char>,
    detached: Vec<RawFd>,
}

impl ExecPlan {
    fn build(program: &Path, spec: &SandboxSpec) -> Result<Self> {
        let program_c = c_string(program.as_os_str())?;

        let mut argv = vec![program_c.clone()];
        for arg in reexec_argv(spec) {
            argv.push(c_string(&arg)?);
        }

        let mut envp = Vec::new();
        for (key, value) in std::env::vars_os() {
            if key == REPORT_FD_ENV {
                continue;
            }
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            envp.push(c_string(OsStr::from_bytes(&entry))?);
        }
        envp.push(c_string(OsStr::new(&format!("{REPORT_FD_ENV}={REPORT_FD}")))?);

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        Ok(Self {
            program: program_c,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
            detached: spec.stdio.detached_fds(),
        })
    }
}

fn c_string(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes())
        .map_err(|_| SandboxError::InteriorNul(value.to_string_lossy().into_owned()))
}

fn null_terminated(values: &[CString]) -> Vec<*const libc::c_char> {
    values
        .iter()
        .map(|v| v.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Body of the cloned child. Only async-signal-safe calls from here on.
unsafe fn child_entry(fds: &ChildFds, plan: &ExecPlan) -> isize {
    unsafe {
        libc::close(fds.ready_write);
        let mut byte = 0u8;
        if libc::read(fds.ready_read, (&mut byte as *mut u8).cast(), 1) != 1 {
            return CHILD_SETUP_FAILED;
        }

        if libc::dup2(fds.report_write, REPORT_FD) < 0 {
            return CHILD_SETUP_FAILED;
        }
        for fd in &plan.detached {
            libc::close(*fd);
        }

        libc::execve(
            plan.program.as_ptr(),
            plan.argv_ptrs.as_ptr(),
            plan.envp_ptrs.as_ptr(),
        );

        let errno = io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::ENOEXEC)
            .to_ne_bytes();
        libc::write(fds.exec_error_write, errno.as_ptr().cast(), errno.len());
        CHILD_EXEC_FAILED
    }
}
