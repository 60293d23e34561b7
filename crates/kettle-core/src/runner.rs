//! Bounded execution of the compiled program
//!
//! The child writes stdout and stderr into one pipe. A drain task reads that
//! pipe from the moment the child starts, because a child that fills the
//! pipe buffer blocks on write and would never reach the exit we are waiting
//! for. The child leads its own session and process group so a timeout can
//! kill everything it spawned, not just the launcher. Descendants that leave
//! the group are caught by [`reaper::sweep`].
//!
//! Teardown order on every path: process group killed, child reaped, strays
//! swept, drain joined or aborted. Only then does the caller's workspace go
//! away.

use crate::config::RunLimits;
use crate::reaper::{self, Launcher};
use crate::{Result, SandboxError};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, pipe2};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 8 * 1024;

/// What happened to one program run
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Process id of the launcher, which is also its process group id
    pub pid: Option<u32>,
    /// Exit code, absent when the process died from a signal
    pub exit_code: Option<i32>,
    /// Terminating signal
    pub signal: Option<i32>,
    /// Merged stdout and stderr
    pub output: String,
    /// The wall-clock deadline fired and the process group was killed
    pub timed_out: bool,
    pub elapsed: Duration,
    /// Fault that makes `output` unusable
    pub error: Option<SandboxError>,
}

impl RunOutcome {
    /// Exited by itself with status 0 and nothing went wrong around it.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.timed_out && self.error.is_none() && matches!(self.exit_code, Some(0))
    }
}

/// Launches `java` against a compiled workspace
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    java: PathBuf,
    drains: Handle,
}

impl SandboxRunner {
    /// `drains` is the runtime that hosts output readers.
    ///
    /// The first run makes this process a child subreaper, see [`reaper`].
    #[must_use]
    pub fn new(java: impl Into<PathBuf>, drains: Handle) -> Self {
        Self {
            java: java.into(),
            drains,
        }
    }

    pub async fn run(&self, workspace: &Path, entry: &str, limits: &RunLimits) -> Result<RunOutcome> {
        reaper::adopt_orphans()?;
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)?;

        let (mut child, launcher) = {
            let mut cmd = Command::new(&self.java);
            cmd.arg(format!("-Xmx{}m", limits.heap_mb))
                .arg("-cp")
                .arg(workspace)
                .arg(entry)
                .current_dir(workspace)
                .stdin(Stdio::null())
                .stdout(Stdio::from(write_end.try_clone()?))
                .stderr(Stdio::from(write_end))
                .kill_on_drop(true);
            // Dropping `cmd` closes our copies of the write end, so the
            // drain sees EOF once the child's tree is gone.
            Launcher::spawn(&mut cmd).map_err(|e| SandboxError::from_spawn(&self.java, e))?
        };

        let pid = child.id();
        let mut group = ProcessGroup::new(pid);
        let mut drain = DrainTask::spawn(&self.drains, read_end, limits.max_output_bytes);
        let start = Instant::now();

        tracing::debug!(entry, pid, heap_mb = limits.heap_mb, "program started");

        let Ok(status) = tokio::time::timeout(limits.wall_clock(), child.wait()).await else {
            if let Err(e) = group.kill() {
                tracing::warn!(pid, error = %e, "failed to kill process group");
            }
            if let Err(e) = child.kill().await {
                tracing::debug!(pid, error = %e, "child already gone");
            }
            drop(launcher);
            reaper::sweep();
            drain.stop().await;

            tracing::info!(entry, pid, limit_secs = limits.wall_clock_secs, "program timed out");
            return Ok(RunOutcome {
                pid,
                timed_out: true,
                elapsed: start.elapsed(),
                error: Some(SandboxError::Timeout(limits.wall_clock_secs)),
                ..RunOutcome::default()
            });
        };
        let status = status?;
        let elapsed = start.elapsed();

        // Anything the program left running still holds the pipe open.
        group.kill()?;
        drop(launcher);
        reaper::sweep();

        let mut outcome = RunOutcome {
            pid,
            exit_code: status.code(),
            signal: status.signal(),
            elapsed,
            ..RunOutcome::default()
        };

        match drain.join_within(limits.drain_grace).await {
            Some(Ok(drained)) if drained.overflowed => {
                outcome.error = Some(SandboxError::OutputLimitExceeded(limits.max_output_bytes));
            }
            Some(Ok(drained)) => {
                outcome.output = String::from_utf8_lossy(&drained.bytes).into_owned();
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                tracing::warn!(entry, pid, grace = ?limits.drain_grace, "output drain overran");
                outcome.error = Some(SandboxError::DrainTimeout(limits.drain_grace));
            }
        }

        tracing::debug!(
            entry,
            pid,
            exit_code = ?outcome.exit_code,
            signal = ?outcome.signal,
            elapsed_ms = elapsed.as_millis(),
            "program finished"
        );

        Ok(outcome)
    }
}

/// SIGKILLs the launcher's process group, at the latest when dropped
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw),
        }
    }

    fn kill(&mut self) -> nix::Result<()> {
        let Some(pgid) = self.pgid.take() else {
            return Ok(());
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::warn!(error = %e, "failed to kill process group on drop");
        }
    }
}

#[derive(Debug, Default)]
struct Drained {
    bytes: Vec<u8>,
    overflowed: bool,
}

/// Output reader running beside the wait; aborted if dropped unfinished
struct DrainTask {
    handle: JoinHandle<io::Result<Drained>>,
}

impl DrainTask {
    fn spawn(runtime: &Handle, read_end: OwnedFd, cap: usize) -> Self {
        let handle = runtime.spawn(async move {
            let rx = pipe::Receiver::from_file(std::fs::File::from(read_end))?;
            drain(rx, cap).await
        });
        Self { handle }
    }

    /// `None` when the reader did not reach EOF within `grace`.
    async fn join_within(&mut self, grace: Duration) -> Option<io::Result<Drained>> {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(drained)) => Some(drained),
            Ok(Err(join)) => Some(Err(io::Error::other(join))),
            Err(_) => {
                self.stop().await;
                None
            }
        }
    }

    async fn stop(&mut self) {
        self.handle.abort();
        if let Err(e) = (&mut self.handle).await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "output drain failed");
            }
        }
    }
}

impl Drop for DrainTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn drain(mut rx: pipe::Receiver, cap: usize) -> io::Result<Drained> {
    let mut drained = Drained::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = rx.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        // Past the cap keep reading so the child never blocks, but keep nothing.
        let room = cap.saturating_sub(drained.bytes.len());
        if n > room {
            drained.overflowed = true;
        }
        drained.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok(drained)
}
