//! Result types returned to callers

use crate::SandboxError;
use crate::compiler::CompileOutcome;
use crate::runner::RunOutcome;
use serde::{Deserialize, Serialize};

/// Terminal outcome of one compile-and-run call.
///
/// `output` and `errors` describe the same outcome: whenever `errors` is
/// non-empty, `output` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationResult {
    /// What the program printed (stdout and stderr merged)
    pub output: String,

    /// Why there is no output
    pub errors: String,
}

impl CompilationResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            errors: String::new(),
        }
    }

    #[must_use]
    pub fn failure(errors: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            errors: errors.into(),
        }
    }

    /// Any fault at any stage
    #[must_use]
    pub fn from_error(err: &SandboxError) -> Self {
        Self::failure(err.to_string())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Fold compile and run outcomes into the caller-facing result.
#[must_use]
pub fn assemble(compile: &CompileOutcome, run: Option<&RunOutcome>) -> CompilationResult {
    if !compile.success {
        return CompilationResult::failure(compile.error_text());
    }

    let Some(run) = run else {
        return CompilationResult::failure("program was not run");
    };

    if let Some(err) = &run.error {
        return CompilationResult::from_error(err);
    }

    match (run.exit_code, run.signal) {
        (Some(0), _) => CompilationResult::success(run.output.clone()),
        (Some(code), _) => CompilationResult::from_error(&SandboxError::NonZeroExit(code)),
        (None, Some(signal)) => CompilationResult::from_error(&SandboxError::Signaled(signal)),
        (None, None) => CompilationResult::failure("program ended without an exit status"),
    }
}
