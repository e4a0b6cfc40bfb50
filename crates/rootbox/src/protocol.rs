//! Command line handed to the re-executed binary.
//!
//! ```text
//! exec --rootfs <path> --entrypoint <command> [--stdin] [--stdout] [--stderr]
//!      [--mount <spec>]... [--env <KEY=VALUE>]... --decode <base64 arg>...
//! ```
//!
//! Without `--decode`, arguments after `--` (or the first non-flag token) are
//! taken verbatim, which is how callers that already own their namespaces
//! invoke `exec` by hand.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use crate::codec;
use crate::error::{Result, SandboxError};
use crate::spec::SandboxSpec;
use crate::stdio::{StdioCaps, Stream};

/// First argument that routes a process to the direct exec path.
pub const MARKER: &str = "exec";

pub fn reexec_argv(spec: &SandboxSpec) -> Vec<OsString> {
    let mut argv: Vec<OsString> = vec![
        MARKER.into(),
        "--rootfs".into(),
        spec.root.clone().into_os_string(),
        "--entrypoint".into(),
        spec.command.clone(),
    ];
    for stream in spec.stdio.attached() {
        argv.push(stream.flag().into());
    }
    for mount in &spec.mounts {
        argv.push("--mount".into());
        argv.push(mount.clone());
    }
    for entry in &spec.env {
        argv.push("--env".into());
        argv.push(entry.clone());
    }
    argv.push("--decode".into());
    argv.extend(spec.args.iter().map(|a| OsString::from(codec::encode(a))));
    argv
}

/// Parsed `exec` arguments, before argument decoding.
#[derive(Debug, Default)]
pub struct ExecArgs {
    rootfs: Option<PathBuf>,
    entrypoint: Option<OsString>,
    stdio: StdioCaps,
    mounts: Vec<OsString>,
    env: Vec<OsString>,
    decode: bool,
    args: Vec<OsString>,
}

impl ExecArgs {
    /// Parses the tokens following [`MARKER`].
    pub fn parse<I>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut parsed = Self::default();
        let mut raw = raw.into_iter();

        while let Some(token) = raw.next() {
            let Some(flag) = token.to_str() else {
                parsed.args.push(token);
                break;
            };
            match flag {
                "--rootfs" => parsed.rootfs = Some(value(&mut raw, flag)?.into()),
                "--entrypoint" => parsed.entrypoint = Some(value(&mut raw, flag)?),
                "--stdin" => parsed.stdio = parsed.stdio.with(Stream::Stdin),
                "--stdout" => parsed.stdio = parsed.stdio.with(Stream::Stdout),
                "--stderr" => parsed.stdio = parsed.stdio.with(Stream::Stderr),
                "--mount" => parsed.mounts.push(value(&mut raw, flag)?),
                "--env" => parsed.env.push(value(&mut raw, flag)?),
                "--decode" => {
                    parsed.decode = true;
                    break;
                }
                "--" => break,
                other if other.starts_with("--") => {
                    return Err(SandboxError::Protocol(format!("unknown argument: {other}")));
                }
                _ => {
                    parsed.args.push(token);
                    break;
                }
            }
        }
        parsed.args.extend(raw);
        Ok(parsed)
    }

    /// Builds the spec, decoding arguments when `--decode` was given.
    pub fn into_spec(self) -> Result<SandboxSpec> {
        let root = self
            .rootfs
            .ok_or_else(|| SandboxError::Protocol("missing --rootfs".to_string()))?;
        let command = self
            .entrypoint
            .ok_or_else(|| SandboxError::Protocol("missing --entrypoint".to_string()))?;

        let args = if self.decode {
            self.args
                .iter()
                .map(|token| codec::decode(token))
                .collect::<Result<Vec<_>>>()?
        } else {
            self.args
        };

        Ok(SandboxSpec {
            root,
            command,
            args,
            env: self.env,
            mounts: self.mounts,
            stdio: self.stdio,
        })
    }
}

fn value(raw: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<OsString> {
    raw.next()
        .ok_or_else(|| SandboxError::Protocol(format!("{flag} requires a value")))
}

/// Convenience for the receiving side: `raw` excludes the program name and
/// the marker.
pub fn parse_spec<I>(raw: I) -> Result<SandboxSpec>
where
    I: IntoIterator<Item = OsString>,
{
    ExecArgs::parse(raw)?.into_spec()
}

pub fn is_marker(arg: &OsStr) -> bool {
    arg == MARKER
}
