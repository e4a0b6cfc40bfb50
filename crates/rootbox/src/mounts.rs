//! Filesystem setup inside the target root: `/proc`, `/dev`, then host binds.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::spec::root_relative;
use crate::sys::{MountOps, MountRequest};

/// A host directory (or file) exposed inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    pub source: PathBuf,
    /// Location inside the sandbox, interpreted relative to the root.
    pub target: PathBuf,
}

impl HostMount {
    /// Parses `path` (same path on both sides) or `source:target`.
    pub fn parse(spec: &OsStr) -> Result<Self> {
        let invalid = || SandboxError::InvalidMount(spec.to_string_lossy().into_owned());

        let parts: Vec<&[u8]> = spec.as_bytes().split(|b| *b == b':').collect();
        let (source, target) = match parts.as_slice() {
            [path] => (*path, *path),
            [source, target] => (*source, *target),
            _ => return Err(invalid()),
        };
        if source.is_empty() || target.is_empty() {
            return Err(invalid());
        }

        let target = PathBuf::from(OsStr::from_bytes(target));
        if target.components().any(|c| c == Component::ParentDir) {
            return Err(invalid());
        }

        Ok(Self {
            source: PathBuf::from(OsStr::from_bytes(source)),
            target,
        })
    }

    pub fn parse_all(specs: &[OsString]) -> Result<Vec<Self>> {
        specs.iter().map(|s| Self::parse(s)).collect()
    }
}

/// Mounts a fresh procfs, the host `/dev`, and every host mount beneath
/// `root`, strictly in that order, stopping at the first failure.
///
/// All mount specs are parsed up front: a malformed one fails the call before
/// the first syscall. Mounts made before a failure are left in place.
pub fn establish_mounts<M: MountOps>(
    ops: &mut M,
    root: &Path,
    host_mounts: &[OsString],
) -> Result<()> {
    let host_mounts = HostMount::parse_all(host_mounts)?;

    let propagation = MountRequest::private_propagation("/");
    ops.mount(&propagation).map_err(|source| SandboxError::Mount {
        from: PathBuf::from("/"),
        target: PathBuf::from("/"),
        source,
    })?;

    mount_proc(ops, root)?;
    mount_dev(ops, root)?;

    for mount in &host_mounts {
        mount_bind(ops, root, &mount.source, &mount.target)?;
    }
    Ok(())
}

fn mount_proc<M: MountOps>(ops: &mut M, root: &Path) -> Result<()> {
    let target = root.join("proc");
    apply(ops, MountRequest::proc(&target), Path::new("proc"), false)
}

fn mount_dev<M: MountOps>(ops: &mut M, root: &Path) -> Result<()> {
    mount_bind(ops, root, Path::new("/dev"), Path::new("/dev"))
}

fn mount_bind<M: MountOps>(ops: &mut M, root: &Path, source: &Path, target: &Path) -> Result<()> {
    let target = root_relative(root, target);
    let file_source = source.is_file();
    apply(ops, MountRequest::bind(source, &target), source, file_source)
}

fn apply<M: MountOps>(
    ops: &mut M,
    request: MountRequest,
    from: &Path,
    file_target: bool,
) -> Result<()> {
    let mount_error = |source| SandboxError::Mount {
        from: from.to_path_buf(),
        target: request.target.clone(),
        source,
    };

    prepare_target(&request.target, file_target).map_err(mount_error)?;
    debug!(from = %from.display(), target = %request.target.display(), "mounting");
    ops.mount(&request).map_err(mount_error)
}

fn prepare_target(target: &Path, file_target: bool) -> std::io::Result<()> {
    if !file_target {
        return fs::create_dir_all(target);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if !target.exists() {
        fs::File::create(target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sys::fake::{Call, RecordingKernel};
    use nix::mount::MsFlags;

    fn specs(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn parses_single_path_and_pairs() {
        let same = HostMount::parse(OsStr::new("/var/cache")).expect("single");
        assert_eq!(same.source, PathBuf::from("/var/cache"));
        assert_eq!(same.target, PathBuf::from("/var/cache"));

        let pair = HostMount::parse(OsStr::new("/data:/mnt/data")).expect("pair");
        assert_eq!(pair.source, PathBuf::from("/data"));
        assert_eq!(pair.target, PathBuf::from("/mnt/data"));
    }

    #[test]
    fn rejects_malformed_specs() {
        for bad in ["/a:/b:/c", "a::b", ":/b", "/a:", "/a:/../etc"] {
            let err = HostMount::parse(OsStr::new(bad)).expect_err(bad);
            assert_eq!(err.kind(), ErrorKind::Precondition);
        }
    }

    #[test]
    fn mounts_proc_then_dev_then_host_in_order() {
        let root = tempfile::tempdir().expect("tempdir");
        let host = tempfile::tempdir().expect("host dir");
        let mut kernel = RecordingKernel::default();

        let pair = format!("{}:/mnt/data", host.path().display());
        let single = host.path().display().to_string();
        let requested = specs(&[pair.as_str(), single.as_str()]);
        establish_mounts(&mut kernel, root.path(), &requested).expect("mounts");

        let r = root.path();
        assert_eq!(
            kernel.mount_targets(),
            vec![
                PathBuf::from("/"),
                r.join("proc"),
                r.join("dev"),
                r.join("mnt/data"),
                root_relative(r, host.path()),
            ]
        );
        match &kernel.calls[1] {
            Call::Mount(req) => assert_eq!(req.fstype, Some("proc")),
            other => panic!("unexpected call {other:?}"),
        }
        match &kernel.calls[3] {
            Call::Mount(req) => {
                assert_eq!(req.source.as_deref(), Some(host.path()));
                assert!(req.flags.contains(MsFlags::MS_BIND | MsFlags::MS_REC));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert!(r.join("mnt/data").is_dir());
        assert!(r.join("proc").is_dir());
    }

    #[test]
    fn malformed_spec_prevents_every_mount() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut kernel = RecordingKernel::default();

        let err = establish_mounts(&mut kernel, root.path(), &specs(&["/ok", "/a:/b:/c"]))
            .expect_err("must fail");
        assert!(matches!(err, SandboxError::InvalidMount(_)));
        assert!(kernel.calls.is_empty());
        assert!(!root.path().join("proc").exists());
    }

    #[test]
    fn stops_at_first_failure() {
        let root = tempfile::tempdir().expect("tempdir");
        // index 0 is propagation, 1 is proc, 2 is dev
        let mut kernel = RecordingKernel::failing_mount(2);

        let err = establish_mounts(&mut kernel, root.path(), &specs(&["/tmp:/mnt/tmp"]))
            .expect_err("dev mount fails");
        assert_eq!(err.kind(), ErrorKind::Mount);
        assert!(err.to_string().contains("/dev"));
        assert_eq!(
            kernel.mount_targets(),
            vec![
                PathBuf::from("/"),
                root.path().join("proc"),
                root.path().join("dev")
            ]
        );
    }

    #[test]
    fn file_sources_get_file_targets() {
        let root = tempfile::tempdir().expect("tempdir");
        let host = tempfile::tempdir().expect("host dir");
        let file = host.path().join("resolv.conf");
        fs::write(&file, "nameserver 127.0.0.1\n").expect("write");
        let mut kernel = RecordingKernel::default();

        let spec = format!("{}:/etc/resolv.conf", file.display());
        establish_mounts(&mut kernel, root.path(), &specs(&[spec.as_str()])).expect("mounts");
        assert!(root.path().join("etc/resolv.conf").is_file());
    }
}
