//! Error types for kettle-core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Could not find a public class in the code.")]
    EntryNotFound,

    /// Compiler diagnostics, already rendered.
    #[error("{0}")]
    Compile(String),

    #[error("toolchain unavailable: {0} not found")]
    ToolchainUnavailable(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("exited with code {0}")]
    NonZeroExit(i32),

    #[error("terminated by signal {0}")]
    Signaled(i32),

    #[error("output drain did not finish within {}ms after exit", .0.as_millis())]
    DrainTimeout(Duration),

    #[error("output exceeded {0} bytes")]
    OutputLimitExceeded(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system error: {0}")]
    Nix(#[from] nix::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sandbox is shutting down")]
    ShuttingDown,
}

impl SandboxError {
    /// Map a spawn failure to `ToolchainUnavailable` when the binary is missing.
    pub(crate) fn from_spawn(program: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::ToolchainUnavailable(program.display().to_string())
        } else {
            Self::Io(err)
        }
    }
}
