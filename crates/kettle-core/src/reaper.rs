//! Descendants that leave the launcher's process group
//!
//! A program can move a child out of reach of `killpg` with `setsid` or
//! `setpgid`. To keep track of those, every launcher starts its own session
//! and marks itself a child subreaper, so orphans inside its tree are
//! reparented to the launcher rather than to init. This process is a
//! subreaper as well: once a launcher dies, whatever it leaves behind becomes
//! our child and [`sweep`] kills and reaps it.
//!
//! A stray is a child of this process outside our own process group that is
//! not a live launcher. Launcher descendants can never rejoin our group
//! because they run in another session. Children the host spawns the usual
//! way stay in our group and are never touched.

use nix::errno::Errno;
use nix::sys::prctl;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::{Pid, getpgrp, getpid, setsid};
use parking_lot::Mutex;
use std::io;
use std::sync::OnceLock;
use tokio::process::{Child, Command};

/// Strays can fork while being swept; give up after this many passes.
const MAX_PASSES: usize = 32;

/// Launchers that are spawned and not yet reaped.
static LAUNCHERS: Mutex<Vec<Pid>> = parking_lot::const_mutex(Vec::new());

static ADOPTING: OnceLock<nix::Result<()>> = OnceLock::new();

/// Make this process the subreaper for orphans of finished launchers.
pub fn adopt_orphans() -> nix::Result<()> {
    *ADOPTING.get_or_init(|| {
        let adopted = prctl::set_child_subreaper(true);
        if adopted.is_ok() {
            tracing::debug!(pid = %getpid(), "adopting orphaned descendants");
        }
        adopted
    })
}

/// A spawned launcher, excluded from [`sweep`] until dropped
///
/// Drop it only after the child has been reaped.
#[derive(Debug)]
pub(crate) struct Launcher {
    pid: Option<Pid>,
}

impl Launcher {
    /// Spawn `cmd` in a new session with itself as subreaper.
    pub(crate) fn spawn(cmd: &mut Command) -> io::Result<(Child, Self)> {
        detach(cmd);

        // Held across the spawn so a concurrent sweep never sees the new
        // session leader before it is registered.
        let mut launchers = LAUNCHERS.lock();
        let child = cmd.spawn()?;
        let pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(Pid::from_raw);
        launchers.extend(pid);

        Ok((child, Self { pid }))
    }
}

impl Drop for Launcher {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            LAUNCHERS.lock().retain(|p| *p != pid);
        }
    }
}

#[allow(unsafe_code)]
fn detach(cmd: &mut Command) {
    // SAFETY: the hook only issues the setsid and prctl syscalls, both
    // async-signal-safe, between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            setsid()?;
            prctl::set_child_subreaper(true)?;
            Ok(())
        });
    }
}

/// Kill and reap every stray child of this process.
///
/// Returns how many were swept.
pub fn sweep() -> usize {
    let launchers = LAUNCHERS.lock();
    let host = getpid();
    let group = getpgrp();
    let mut swept = 0;

    for _ in 0..MAX_PASSES {
        let strays: Vec<Pid> = children_of(host)
            .into_iter()
            .filter(|(pid, pgid)| *pgid != group && !launchers.contains(pid))
            .map(|(pid, _)| pid)
            .collect();
        if strays.is_empty() {
            if swept > 0 {
                tracing::debug!(swept, "swept escaped descendants");
            }
            return swept;
        }

        for &pid in &strays {
            match kill(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(%pid, error = %e, "failed to kill stray"),
            }
        }
        // Reaping also finishes the reparenting of the strays' own children,
        // so the next pass sees them.
        for &pid in &strays {
            match waitpid(pid, None) {
                Ok(_) | Err(Errno::ECHILD) => {}
                Err(e) => tracing::warn!(%pid, error = %e, "failed to reap stray"),
            }
        }
        swept += strays.len();
    }

    tracing::warn!(swept, "strays kept forking during sweep");
    swept
}

/// `(pid, pgid)` of every process whose parent is `parent`.
fn children_of(parent: Pid) -> Vec<(Pid, Pid)> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let pid: i32 = entry.file_name().to_str()?.parse().ok()?;
            let stat = std::fs::read_to_string(entry.path().join("stat")).ok()?;
            let (ppid, pgid) = parse_stat(&stat)?;
            (ppid == parent).then_some((Pid::from_raw(pid), pgid))
        })
        .collect()
}

/// Parent and process group from a `/proc/<pid>/stat` line.
fn parse_stat(stat: &str) -> Option<(Pid, Pid)> {
    // The command name may itself contain spaces and parentheses.
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace().skip(1);
    let ppid = fields.next()?.parse().ok()?;
    let pgid = fields.next()?.parse().ok()?;
    Some((Pid::from_raw(ppid), Pid::from_raw(pgid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::process::Stdio;

    #[test]
    fn parses_stat_with_awkward_command_names() {
        let stat = "4242 (evil) S 1 (x) R 7 4240 4240 0 -1 4194560 110 0 0 0";
        assert_eq!(
            parse_stat(stat),
            Some((Pid::from_raw(7), Pid::from_raw(4240)))
        );

        let stat = "17 (sh) S 12 17 17 0 -1 4194304";
        assert_eq!(parse_stat(stat), Some((Pid::from_raw(12), Pid::from_raw(17))));
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn adoption_is_idempotent() {
        assert_eq!(adopt_orphans(), Ok(()));
        assert_eq!(adopt_orphans(), Ok(()));
    }

    #[tokio::test]
    async fn launchers_lead_their_own_session() {
        let mut cmd = Command::new("true");
        cmd.stdout(Stdio::null());
        let (mut child, launcher) = Launcher::spawn(&mut cmd).unwrap();
        let pid = launcher.pid.unwrap();

        // Unreaped, so at worst a zombie that still reports its group.
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap();
        let (_, pgid) = parse_stat(&stat).unwrap();
        assert_eq!(pgid, pid);
        assert!(LAUNCHERS.lock().contains(&pid));

        child.wait().await.unwrap();
        drop(launcher);
        assert!(!LAUNCHERS.lock().contains(&pid));
    }

    #[test]
    fn host_group_children_survive_a_sweep() {
        adopt_orphans().unwrap();
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        sweep();
        assert_eq!(child.try_wait().unwrap(), None);
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
