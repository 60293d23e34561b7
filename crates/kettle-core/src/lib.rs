//! # kettle-core
//!
//! Compile-and-run sandbox for untrusted single-file Java programs.
//!
//! One call to [`Sandbox::compile_and_run`] walks the whole pipeline:
//! - `inspect` - find the `public class` that names the source file
//! - `workspace` - per-invocation temp directory, removed on every exit path
//! - `compiler` - `javac` with structured diagnostics
//! - `runner` - `java` with a heap ceiling, wall-clock deadline and a
//!   concurrent drain of the merged stdout/stderr pipe
//! - `reaper` - kill whatever a program detached from its process group
//! - `result` - fold the outcomes into one [`CompilationResult`]

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod compiler;
pub mod config;
pub mod error;
pub mod inspect;
pub mod protocol;
pub mod reaper;
pub mod result;
pub mod runner;
pub mod sandbox;
pub mod workspace;

pub use config::SandboxConfig;
pub use error::SandboxError;
pub use result::CompilationResult;
pub use sandbox::{Sandbox, SandboxStatus};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, SandboxError>;
