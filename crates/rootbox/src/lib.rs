//! Run a command inside a fresh Linux namespace set with its own root
//! filesystem.
//!
//! Two entry points:
//!
//! - [`launch`] clones a new mount/UTS/IPC/PID/network/user namespace set,
//!   maps the caller to root inside it, and re-executes the current binary
//!   with the `exec` marker. That binary must hand those arguments to
//!   [`reexec::run`].
//! - [`exec_in_place`] performs the mounts, root switch and command start in
//!   the caller's own namespaces.
//!
//! ```no_run
//! use rootbox::{SandboxSpec, StdioCaps};
//!
//! fn main() {
//!     let mut argv = std::env::args_os().skip(1);
//!     if argv.next().is_some_and(|a| rootbox::protocol::is_marker(&a)) {
//!         std::process::exit(rootbox::reexec::run(argv));
//!     }
//!
//!     let spec = SandboxSpec::new("/srv/rootfs", "/bin/sh")
//!         .args(["-c", "echo hello from $(hostname)"])
//!         .env("PATH=/usr/bin:/bin")
//!         .mount("/var/cache/pkgs:/cache")
//!         .stdio(StdioCaps::ALL);
//!     let status = rootbox::launch(spec).expect("sandbox failed");
//!     std::process::exit(status.code());
//! }
//! ```

#![cfg(target_os = "linux")]

pub mod codec;
pub mod error;
pub mod exec;
pub mod launch;
pub mod mounts;
pub mod pivot;
pub mod protocol;
pub mod reexec;
pub mod spec;
pub mod stdio;
pub mod sys;

pub use error::{ErrorKind, Result, SandboxError};
pub use exec::exec_in_place;
pub use launch::{IdMap, IdMappings, Launcher, launch};
pub use mounts::{HostMount, establish_mounts};
pub use pivot::switch_root;
pub use spec::{SandboxSpec, Termination};
pub use stdio::{StdioCaps, Stream, attach_stdio};
