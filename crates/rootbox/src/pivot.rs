use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::sys::{MountOps, MountRequest};

const PUT_OLD: &str = ".pivot_root";

/// Makes `root` the filesystem root of the calling process and detaches the
/// previous root.
///
/// `pivot_root(2)` requires the new root to be a mount point, so it is first
/// bind-mounted onto itself. The old root is parked under `/.pivot_root`,
/// lazily unmounted, and the directory removed.
pub fn switch_root<M: MountOps>(ops: &mut M, root: &Path) -> Result<()> {
    let fail = |step: &'static str| {
        move |source| SandboxError::Pivot {
            root: root.to_path_buf(),
            step,
            source,
        }
    };

    ops.mount(&MountRequest::bind(root, root))
        .map_err(fail("bind new root"))?;

    let put_old = root.join(PUT_OLD);
    if !put_old.is_dir() {
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&put_old)
            .map_err(fail("create put_old"))?;
    }

    debug!(root = %root.display(), "pivoting root");
    ops.pivot_root(root, &put_old).map_err(fail("pivot_root"))?;
    ops.chdir(Path::new("/")).map_err(fail("chdir"))?;

    let old_root = PathBuf::from("/").join(PUT_OLD);
    ops.unmount_detached(&old_root).map_err(fail("detach old root"))?;
    ops.remove_dir(&old_root).map_err(fail("remove put_old"))?;
    Ok(())
}
