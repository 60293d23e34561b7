//! Daemon configuration

use anyhow::{Context, Result};
use kettle_core::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "KETTLE_CONFIG";

/// Configuration for the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to Unix socket
    pub socket_path: PathBuf,

    /// Sandbox configuration
    pub sandbox: SandboxConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: kettle_core::config::default_socket_path(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `$KETTLE_CONFIG` if set, defaults otherwise.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Load a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.sandbox.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn file_overrides_only_what_it_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kettle.json");
        std::fs::write(
            &path,
            r#"{ "socket_path": "/tmp/k.sock", "sandbox": { "max_concurrent": 2 } }"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/k.sock"));
        assert_eq!(config.sandbox.max_concurrent, 2);
        assert_eq!(config.sandbox.wall_clock_secs, 5);
        assert_eq!(config.sandbox.heap_mb, 128);
    }

    #[test]
    fn invalid_limits_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kettle.json");
        std::fs::write(&path, r#"{ "sandbox": { "wall_clock_secs": 0 } }"#).unwrap();
        assert!(DaemonConfig::load(&path).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = DaemonConfig::load(Path::new("/nonexistent/kettle.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kettle.json"));
    }
}
