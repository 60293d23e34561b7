//! The compile-and-run service

use crate::compiler::Compiler;
use crate::inspect::extract_entry_name;
use crate::result::{CompilationResult, assemble};
use crate::runner::SandboxRunner;
use crate::workspace::with_workspace;
use crate::{Result, SandboxConfig, SandboxError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// How an invocation ended, for the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    CompileFailed,
    TimedOut,
    RuntimeFailed,
    Fault,
}

/// Snapshot of sandbox activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub total: u64,
    pub in_flight: usize,
    pub succeeded: u64,
    pub compile_failed: u64,
    pub runtime_failed: u64,
    pub timed_out: u64,
    pub faulted: u64,
    /// Invocations that could start right now
    pub available: usize,
    pub shutting_down: bool,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    in_flight: usize,
    succeeded: u64,
    compile_failed: u64,
    runtime_failed: u64,
    timed_out: u64,
    faulted: u64,
}

impl Counters {
    fn begin(&mut self) {
        self.total += 1;
        self.in_flight += 1;
    }

    fn finish(&mut self, verdict: Verdict) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let slot = match verdict {
            Verdict::Success => &mut self.succeeded,
            Verdict::CompileFailed => &mut self.compile_failed,
            Verdict::TimedOut => &mut self.timed_out,
            Verdict::RuntimeFailed => &mut self.runtime_failed,
            Verdict::Fault => &mut self.faulted,
        };
        *slot += 1;
    }
}

/// Counts an invocation as in flight until dropped. An invocation whose
/// future is dropped part way is counted as a fault.
struct Admitted<'a> {
    counters: &'a Mutex<Counters>,
    verdict: Verdict,
}

impl<'a> Admitted<'a> {
    fn begin(counters: &'a Mutex<Counters>) -> Self {
        counters.lock().begin();
        Self {
            counters,
            verdict: Verdict::Fault,
        }
    }
}

impl Drop for Admitted<'_> {
    fn drop(&mut self) {
        self.counters.lock().finish(self.verdict);
    }
}

/// Compiles and runs untrusted single-file programs.
///
/// Invocations share nothing but the temp root. The output readers run on
/// the runtime captured at construction; [`Sandbox::shutdown`] stops
/// admitting work and waits for what is in flight.
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    compiler: Compiler,
    runner: SandboxRunner,
    admission: Semaphore,
    counters: Mutex<Counters>,
}

impl Sandbox {
    /// Start a sandbox on the current tokio runtime.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SandboxError::Config(format!("no tokio runtime: {e}")))?;
        Self::with_runtime(config, runtime)
    }

    /// Start a sandbox whose output readers run on `runtime`.
    pub fn with_runtime(config: SandboxConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.temp_root)?;

        tracing::info!(
            temp_root = ?config.temp_root,
            wall_clock_secs = config.wall_clock_secs,
            heap_mb = config.heap_mb,
            max_concurrent = config.max_concurrent,
            "sandbox started"
        );

        Ok(Self {
            compiler: Compiler::new(&config.javac_path, config.compile_timeout()),
            runner: SandboxRunner::new(&config.java_path, runtime),
            admission: Semaphore::new(config.max_concurrent),
            counters: Mutex::new(Counters::default()),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compile `source`, run it, and report one terminal outcome.
    ///
    /// Never fails: every fault is folded into `errors`.
    pub async fn compile_and_run(&self, source: &str) -> CompilationResult {
        let Ok(_permit) = self.admission.acquire().await else {
            return CompilationResult::from_error(&SandboxError::ShuttingDown);
        };

        let mut admitted = Admitted::begin(&self.counters);
        let start = Instant::now();

        let (result, verdict) = match self.invoke(source).await {
            Ok(done) => done,
            Err(err @ SandboxError::EntryNotFound) => {
                (CompilationResult::from_error(&err), Verdict::CompileFailed)
            }
            Err(err) => {
                tracing::warn!(error = %err, "invocation faulted");
                (CompilationResult::from_error(&err), Verdict::Fault)
            }
        };

        admitted.verdict = verdict;
        drop(admitted);
        tracing::info!(
            verdict = ?verdict,
            elapsed_ms = start.elapsed().as_millis(),
            output_len = result.output.len(),
            "invocation finished"
        );

        result
    }

    async fn invoke(&self, source: &str) -> Result<(CompilationResult, Verdict)> {
        let entry = extract_entry_name(source)?;
        let entry = entry.as_str();
        tracing::debug!(entry, source_len = source.len(), "entry class found");

        with_workspace(&self.config.temp_root, entry, source, |dir| async move {
            let compiled = self.compiler.compile(&dir, entry).await?;
            if !compiled.success {
                return Ok((assemble(&compiled, None), Verdict::CompileFailed));
            }

            let run = self
                .runner
                .run(&dir, entry, &self.config.run_limits())
                .await?;

            let verdict = if run.timed_out {
                Verdict::TimedOut
            } else if run.is_success() {
                Verdict::Success
            } else {
                Verdict::RuntimeFailed
            };
            Ok::<_, SandboxError>((assemble(&compiled, Some(&run)), verdict))
        })
        .await?
    }

    /// Current counters
    pub fn status(&self) -> SandboxStatus {
        let c = self.counters.lock();
        SandboxStatus {
            total: c.total,
            in_flight: c.in_flight,
            succeeded: c.succeeded,
            compile_failed: c.compile_failed,
            runtime_failed: c.runtime_failed,
            timed_out: c.timed_out,
            faulted: c.faulted,
            available: self.admission.available_permits(),
            shutting_down: self.admission.is_closed(),
        }
    }

    /// Stop admitting invocations and wait for the running ones to finish.
    pub async fn shutdown(&self) {
        let slots = u32::try_from(self.config.max_concurrent).unwrap_or(u32::MAX);
        match self.admission.acquire_many(slots).await {
            Ok(all) => {
                self.admission.close();
                drop(all);
                tracing::info!("sandbox stopped");
            }
            Err(_) => tracing::debug!("sandbox already stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(root: &std::path::Path) -> SandboxConfig {
        SandboxConfig::builder()
            .temp_root(root)
            .javac_path("/nonexistent/bin/javac")
            .java_path("/nonexistent/bin/java")
            .max_concurrent(2)
            .build()
    }

    #[tokio::test]
    async fn source_without_public_class_is_rejected_before_disk() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config(root.path())).unwrap();

        let result = sandbox.compile_and_run("class Hidden {}").await;
        assert_eq!(
            result,
            CompilationResult::failure("Could not find a public class in the code.")
        );
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(sandbox.status().compile_failed, 1);
    }

    #[tokio::test]
    async fn missing_toolchain_is_reported_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config(root.path())).unwrap();

        let result = sandbox.compile_and_run("public class Main {}").await;
        assert_eq!(result.output, "");
        assert_eq!(
            result.errors,
            "toolchain unavailable: /nonexistent/bin/javac not found"
        );
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        let status = sandbox.status();
        assert_eq!(status.total, 1);
        assert_eq!(status.faulted, 1);
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.available, 2);
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_refused() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(config(root.path())).unwrap();

        sandbox.shutdown().await;
        assert!(sandbox.status().shutting_down);

        let result = sandbox.compile_and_run("public class Main {}").await;
        assert_eq!(result, CompilationResult::failure("sandbox is shutting down"));
        assert_eq!(sandbox.status().total, 0);

        // Idempotent.
        sandbox.shutdown().await;
    }

    #[test]
    fn needs_a_runtime() {
        let root = tempfile::tempdir().unwrap();
        let err = Sandbox::new(config(root.path())).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn invalid_config_is_rejected_at_start() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let bad = SandboxConfig::builder().heap_mb(0).build();
        let err = Sandbox::with_runtime(bad, rt.handle().clone()).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }
}
