use std::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::mounts::{HostMount, establish_mounts};
use crate::pivot::switch_root;
use crate::spec::{SandboxSpec, Termination};
use crate::stdio::attach_stdio;
use crate::sys::{HostKernel, MountOps};

/// Runs `spec` in the namespaces the calling process already occupies:
/// mounts, root switch, then the target command as a child process.
///
/// This changes the root of the *calling* process, and recursively marks
/// `/` as private in the calling process's mount namespace. Called from the
/// host mount namespace, that rewrites the host's mount propagation. It is
/// meant for the re-executed instance started by [`crate::launch`], or for
/// callers that have entered a fresh mount namespace themselves.
pub fn exec_in_place(spec: SandboxSpec) -> Result<Termination> {
    exec_in_place_with(&mut HostKernel, spec)
}

pub fn exec_in_place_with<M: MountOps>(ops: &mut M, spec: SandboxSpec) -> Result<Termination> {
    spec.ensure_root_exists()?;
    // Reject bad input before the first mount.
    HostMount::parse_all(&spec.mounts)?;
    spec.env_pairs()?;

    establish_mounts(ops, &spec.root, &spec.mounts)?;
    debug!(root = %spec.root.display(), "mounts established");
    switch_root(ops, &spec.root)?;
    debug!("root switched");

    run_target(&spec)
}

/// Starts the target command with exactly `spec.env` and waits for it.
pub(crate) fn run_target(spec: &SandboxSpec) -> Result<Termination> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args).env_clear();
    for (key, value) in spec.env_pairs()? {
        cmd.env(key, value);
    }
    attach_stdio(&mut cmd, spec.stdio);

    let exec_error = |source| SandboxError::Exec {
        command: spec.command.clone(),
        source,
    };
    let mut child = cmd.spawn().map_err(exec_error)?;
    info!(command = %spec.command.to_string_lossy(), pid = child.id(), "target started");
    let status = child.wait().map_err(exec_error)?;

    let termination = Termination::from(status);
    info!(code = termination.code(), "target exited");
    Ok(termination)
}
