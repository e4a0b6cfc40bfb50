use anyhow::{Context, Result};
use rootbox::StdioCaps;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Defaults applied to every `rootbox run`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Host mounts placed before the ones given on the command line.
    pub mounts: Vec<String>,
    /// Environment entries placed before the ones given on the command line.
    pub env: Vec<String>,
    /// Streams attached when no `--stdin/--stdout/--stderr` flag is given.
    pub stdio: StdioCaps,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mounts: Vec::new(),
            env: Vec::new(),
            stdio: StdioCaps::ALL,
        }
    }
}

impl RunConfig {
    /// Loads `explicit` if given (it must exist), otherwise the default
    /// config file when present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn config_path() -> PathBuf {
        dirs_path().join("config.toml")
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("rootbox")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("rootbox")
    } else {
        PathBuf::from("/etc/rootbox")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: RunConfig = toml::from_str("mounts = [\"/nix\"]").expect("parse");
        assert_eq!(config.mounts, vec!["/nix".to_string()]);
        assert!(config.env.is_empty());
        assert_eq!(config.stdio, StdioCaps::ALL);
    }

    #[test]
    fn stdio_table_is_partial() {
        let config: RunConfig = toml::from_str(
            r#"
            env = ["PATH=/usr/bin:/bin", "LANG=C.UTF-8"]

            [stdio]
            stdout = true
            "#,
        )
        .expect("parse");
        assert_eq!(config.env.len(), 2);
        assert!(config.stdio.stdout);
        assert!(!config.stdio.stdin);
        assert!(!config.stdio.stderr);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RunConfig::load(Some(&dir.path().join("absent.toml"))).expect_err("missing");
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mount = [\"/typo\"]\n").expect("write");
        assert!(RunConfig::load(Some(&path)).is_err());
    }
}
