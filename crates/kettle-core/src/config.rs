//! Sandbox configuration

use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Wall-clock ceiling for one program run, in seconds.
pub const DEFAULT_WALL_CLOCK_SECS: u64 = 5;

/// Heap ceiling passed to the runtime launcher, in megabytes.
pub const DEFAULT_HEAP_MB: u64 = 128;

/// Upper bound on `max_concurrent`.
pub const MAX_CONCURRENT: usize = 4096;

/// Configuration for a sandbox instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory under which per-invocation workspaces are created
    pub temp_root: PathBuf,

    /// Maximum run time of the compiled program
    pub wall_clock_secs: u64,

    /// Heap limit for the runtime (`-Xmx`), in MB
    pub heap_mb: u64,

    /// Path to the compiler
    pub javac_path: PathBuf,

    /// Path to the runtime launcher
    pub java_path: PathBuf,

    /// Maximum time `javac` may take
    pub compile_timeout_secs: u64,

    /// How long the output reader may take to flush once the program exited
    pub drain_grace_ms: u64,

    /// Cap on captured program output
    pub max_output_bytes: usize,

    /// Invocations admitted at once
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
            wall_clock_secs: DEFAULT_WALL_CLOCK_SECS,
            heap_mb: DEFAULT_HEAP_MB,
            javac_path: PathBuf::from("javac"),
            java_path: PathBuf::from("java"),
            compile_timeout_secs: 30,
            drain_grace_ms: 1000,
            max_output_bytes: 1024 * 1024, // 1MB
            max_concurrent: 8,
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Reject values that would make every invocation fail.
    pub fn validate(&self) -> Result<()> {
        if self.wall_clock_secs == 0 {
            return Err(SandboxError::Config("wall_clock_secs must be at least 1".into()));
        }
        if self.heap_mb == 0 {
            return Err(SandboxError::Config("heap_mb must be at least 1".into()));
        }
        if self.compile_timeout_secs == 0 {
            return Err(SandboxError::Config(
                "compile_timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_concurrent == 0 || self.max_concurrent > MAX_CONCURRENT {
            return Err(SandboxError::Config(format!(
                "max_concurrent must be between 1 and {MAX_CONCURRENT}"
            )));
        }
        if self.temp_root.as_os_str().is_empty() {
            return Err(SandboxError::Config("temp_root must not be empty".into()));
        }
        Ok(())
    }

    /// Limits handed to the runner for one invocation
    #[must_use]
    pub const fn run_limits(&self) -> RunLimits {
        RunLimits {
            wall_clock_secs: self.wall_clock_secs,
            heap_mb: self.heap_mb,
            drain_grace: Duration::from_millis(self.drain_grace_ms),
            max_output_bytes: self.max_output_bytes,
        }
    }

    #[must_use]
    pub const fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }
}

/// Resource ceilings for a single program run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub wall_clock_secs: u64,
    pub heap_mb: u64,
    pub drain_grace: Duration,
    pub max_output_bytes: usize,
}

impl RunLimits {
    #[must_use]
    pub const fn wall_clock(&self) -> Duration {
        Duration::from_secs(self.wall_clock_secs)
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        SandboxConfig::default().run_limits()
    }
}

/// Builder for SandboxConfig
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    #[must_use]
    pub fn temp_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.temp_root = path.into();
        self
    }

    #[must_use]
    pub const fn wall_clock_secs(mut self, secs: u64) -> Self {
        self.config.wall_clock_secs = secs;
        self
    }

    #[must_use]
    pub const fn heap_mb(mut self, mb: u64) -> Self {
        self.config.heap_mb = mb;
        self
    }

    #[must_use]
    pub fn javac_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.javac_path = path.into();
        self
    }

    #[must_use]
    pub fn java_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.java_path = path.into();
        self
    }

    #[must_use]
    pub const fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn drain_grace_ms(mut self, ms: u64) -> Self {
        self.config.drain_grace_ms = ms;
        self
    }

    #[must_use]
    pub const fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n.clamp(1, MAX_CONCURRENT);
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Get default socket path from KETTLE_SOCKET env var or system default
///
/// Returns:
/// - `$KETTLE_SOCKET` if set (for development)
/// - `/run/kettle/kettle.sock` otherwise (production)
pub fn default_socket_path() -> PathBuf {
    std::env::var("KETTLE_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/kettle/kettle.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_ceilings() {
        let config = SandboxConfig::default();
        assert_eq!(config.wall_clock_secs, 5);
        assert_eq!(config.heap_mb, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{ "temp_root": "/srv/kettle", "heap_mb": 64 }"#).unwrap();
        assert_eq!(config.temp_root, PathBuf::from("/srv/kettle"));
        assert_eq!(config.heap_mb, 64);
        assert_eq!(config.wall_clock_secs, DEFAULT_WALL_CLOCK_SECS);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = SandboxConfig::builder().wall_clock_secs(0).build();
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));

        let config = SandboxConfig::builder().heap_mb(0).build();
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));
    }

    #[test]
    fn run_limits_carry_grace_period() {
        let limits = SandboxConfig::builder().drain_grace_ms(250).build().run_limits();
        assert_eq!(limits.drain_grace, Duration::from_millis(250));
        assert_eq!(limits.wall_clock(), Duration::from_secs(5));
    }
}
