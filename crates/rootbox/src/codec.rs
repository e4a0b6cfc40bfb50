//! Byte-safe transport encoding for command arguments.
//!
//! Arguments cross the re-exec boundary as standard base64 so that
//! whitespace, shell metacharacters, control bytes and non-UTF-8 data all
//! survive as a single argv element. The base64 alphabet never produces a
//! leading `-`, so encoded tokens cannot be mistaken for flags.

use base64::Engine;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::error::{Result, SandboxError};

pub fn encode(arg: &OsStr) -> String {
    base64::engine::general_purpose::STANDARD.encode(arg.as_bytes())
}

/// Inverse of [`encode`]. Tokens that `encode` could not have produced are
/// rejected rather than decoded leniently.
pub fn decode(token: &OsStr) -> Result<OsString> {
    let text = token.to_str().ok_or_else(|| SandboxError::Decode {
        token: token.to_string_lossy().into_owned(),
        source: base64::DecodeError::InvalidLength(token.len()),
    })?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|source| SandboxError::Decode {
            token: text.to_string(),
            source,
        })?;
    Ok(OsString::from_vec(bytes))
}
