//! The kernel calls the mount and pivot steps are built from.

use nix::mount::{MntFlags, MsFlags};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<&'static str>,
    pub flags: MsFlags,
}

impl MountRequest {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
            target: target.into(),
            fstype: None,
            flags: MsFlags::MS_BIND | MsFlags::MS_REC,
        }
    }

    pub fn proc(target: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(PathBuf::from("proc")),
            target: target.into(),
            fstype: Some("proc"),
            flags: MsFlags::empty(),
        }
    }

    /// Marks every mount below `target` private.
    pub fn private_propagation(target: impl Into<PathBuf>) -> Self {
        Self {
            source: None,
            target: target.into(),
            fstype: None,
            flags: MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        }
    }
}

pub trait MountOps {
    fn mount(&mut self, request: &MountRequest) -> io::Result<()>;
    fn pivot_root(&mut self, new_root: &Path, put_old: &Path) -> io::Result<()>;
    fn chdir(&mut self, path: &Path) -> io::Result<()>;
    fn unmount_detached(&mut self, target: &Path) -> io::Result<()>;
    fn remove_dir(&mut self, path: &Path) -> io::Result<()>;
}

/// Issues the real syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostKernel;

impl MountOps for HostKernel {
    fn mount(&mut self, request: &MountRequest) -> io::Result<()> {
        nix::mount::mount(
            request.source.as_deref(),
            &request.target,
            request.fstype,
            request.flags,
            None::<&str>,
        )?;
        Ok(())
    }

    fn pivot_root(&mut self, new_root: &Path, put_old: &Path) -> io::Result<()> {
        nix::unistd::pivot_root(new_root, put_old)?;
        Ok(())
    }

    fn chdir(&mut self, path: &Path) -> io::Result<()> {
        nix::unistd::chdir(path)?;
        Ok(())
    }

    fn unmount_detached(&mut self, target: &Path) -> io::Result<()> {
        nix::mount::umount2(target, MntFlags::MNT_DETACH)?;
        Ok(())
    }

    fn remove_dir(&mut self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Mount(MountRequest),
        PivotRoot(PathBuf, PathBuf),
        Chdir(PathBuf),
        Unmount(PathBuf),
        RemoveDir(PathBuf),
    }

    /// Records calls and fails the n-th mount when asked to.
    #[derive(Debug, Default)]
    pub struct RecordingKernel {
        pub calls: Vec<Call>,
        pub fail_mount_at: Option<usize>,
        pub fail_pivot: bool,
        mounts: usize,
    }

    impl RecordingKernel {
        pub fn failing_mount(index: usize) -> Self {
            Self {
                fail_mount_at: Some(index),
                ..Self::default()
            }
        }

        pub fn failing_pivot() -> Self {
            Self {
                fail_pivot: true,
                ..Self::default()
            }
        }

        pub fn mount_targets(&self) -> Vec<PathBuf> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Mount(req) => Some(req.target.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl MountOps for RecordingKernel {
        fn mount(&mut self, request: &MountRequest) -> io::Result<()> {
            self.calls.push(Call::Mount(request.clone()));
            let index = self.mounts;
            self.mounts += 1;
            if self.fail_mount_at == Some(index) {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            Ok(())
        }

        fn pivot_root(&mut self, new_root: &Path, put_old: &Path) -> io::Result<()> {
            self.calls
                .push(Call::PivotRoot(new_root.to_path_buf(), put_old.to_path_buf()));
            if self.fail_pivot {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            Ok(())
        }

        fn chdir(&mut self, path: &Path) -> io::Result<()> {
            self.calls.push(Call::Chdir(path.to_path_buf()));
            Ok(())
        }

        fn unmount_detached(&mut self, target: &Path) -> io::Result<()> {
            self.calls.push(Call::Unmount(target.to_path_buf()));
            Ok(())
        }

        fn remove_dir(&mut self, path: &Path) -> io::Result<()> {
            self.calls.push(Call::RemoveDir(path.to_path_buf()));
            Ok(())
        }
    }
}
