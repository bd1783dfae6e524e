//! External probes, each bounded by a deadline.
//!
//! Every operation that can hang on an unreachable file server funnels
//! through `run_with_deadline`, which waits on a helper thread and, once
//! the deadline expires, terminates the child with SIGTERM and then
//! SIGKILL after a short grace period. One integration point, one
//! termination policy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpid, Pid};
use rand::Rng;

use crate::cleanup;
use crate::usage::UsageSample;

/// Grace period between SIGTERM and SIGKILL for an overdue child.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// What happened to a deadline-bounded child process.
#[derive(Debug)]
pub enum DeadlineOutcome {
    /// The child finished within the deadline (any exit code).
    Completed(Output),
    /// The deadline expired; the child was killed.
    TimedOut,
    /// The child could not be spawned or waited on.
    Failed(io::Error),
}

/// Run `cmd`, forcibly terminating it if it outlives `deadline`.
pub fn run_with_deadline(mut cmd: Command, deadline: Duration) -> DeadlineOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return DeadlineOutcome::Failed(e),
    };
    let pid = Pid::from_raw(child.id() as i32);
    let (tx, rx) = mpsc::channel();
    // waiting happens on a helper thread so the deadline stays in our hands
    let waiter = thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });
    match rx.recv_timeout(deadline) {
        Ok(Ok(output)) => {
            let _ = waiter.join();
            DeadlineOutcome::Completed(output)
        }
        Ok(Err(e)) => {
            let _ = waiter.join();
            DeadlineOutcome::Failed(e)
        }
        Err(_) => {
            let _ = kill(pid, Signal::SIGTERM);
            thread::sleep(KILL_GRACE);
            let _ = kill(pid, Signal::SIGKILL);
            // the kill guarantees the waiter's wait() returns, reaping the child
            let _ = waiter.join();
            DeadlineOutcome::TimedOut
        }
    }
}

/// Outcome of the stale-mount probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    Responsive,
    /// The usage query blew through the deadline.
    Stale { after: Duration },
    /// The query failed outright; later checks still get their chance.
    ProbeError(String),
}

/// Outcome of the write probe.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    TimedOut,
    Failed,
}

/// The host capabilities the check pipeline needs, behind a seam so the
/// pipeline itself is testable without real mounts.
pub trait Prober {
    fn stale(&mut self, path: &str, extra_df_args: &[String], deadline: Duration) -> ProbeOutcome;
    fn write(&mut self, path: &str, deadline: Duration) -> WriteOutcome;
    fn fs_type(&mut self, path: &str, deadline: Duration) -> Option<String>;
    fn usage(
        &mut self,
        path: &str,
        extra_df_args: &[String],
        deadline: Duration,
    ) -> Option<UsageSample>;
    fn is_dir(&mut self, path: &str) -> bool;
    fn is_symlink(&mut self, path: &str) -> bool;
}

/// The real thing: external commands plus filesystem metadata.
pub struct SystemProber;

impl Prober for SystemProber {
    fn stale(&mut self, path: &str, extra_df_args: &[String], deadline: Duration) -> ProbeOutcome {
        stale_probe(path, extra_df_args, deadline)
    }

    fn write(&mut self, path: &str, deadline: Duration) -> WriteOutcome {
        write_probe(path, deadline)
    }

    fn fs_type(&mut self, path: &str, deadline: Duration) -> Option<String> {
        fs_type_probe(path, deadline)
    }

    fn usage(
        &mut self,
        path: &str,
        extra_df_args: &[String],
        deadline: Duration,
    ) -> Option<UsageSample> {
        usage_probe(path, extra_df_args, deadline)
    }

    fn is_dir(&mut self, path: &str) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn is_symlink(&mut self, path: &str) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }
}

/// Run `df` against `path` and classify responsiveness.
pub fn stale_probe(path: &str, extra_df_args: &[String], deadline: Duration) -> ProbeOutcome {
    let mut cmd = Command::new("df");
    cmd.args(extra_df_args).arg(path);
    match run_with_deadline(cmd, deadline) {
        DeadlineOutcome::Completed(out) if out.status.success() => ProbeOutcome::Responsive,
        DeadlineOutcome::Completed(out) => {
            ProbeOutcome::ProbeError(format!("df exited with {} for {}", out.status, path))
        }
        DeadlineOutcome::TimedOut => ProbeOutcome::Stale { after: deadline },
        DeadlineOutcome::Failed(e) => {
            ProbeOutcome::ProbeError(format!("could not run df for {}: {}", path, e))
        }
    }
}

/// Touch a uniquely named marker file in `path`, then remove it.
///
/// The marker is registered with the cleanup registry before creation so a
/// signal arriving mid-probe still removes it. Removal failure is not
/// reported; the cleanup pass at exit is the backstop.
pub fn write_probe(path: &str, deadline: Duration) -> WriteOutcome {
    let marker = marker_path(path);
    cleanup::register(&marker);
    let mut cmd = Command::new("touch");
    cmd.arg(&marker);
    let outcome = match run_with_deadline(cmd, deadline) {
        DeadlineOutcome::TimedOut => WriteOutcome::TimedOut,
        DeadlineOutcome::Completed(_) | DeadlineOutcome::Failed(_) => {
            // creation counts only if the marker actually exists afterwards
            if marker.exists() {
                WriteOutcome::Written
            } else {
                WriteOutcome::Failed
            }
        }
    };
    let _ = fs::remove_file(&marker);
    cleanup::deregister(&marker);
    outcome
}

/// Ask for the on-disk filesystem type of `path`.
pub fn fs_type_probe(path: &str, deadline: Duration) -> Option<String> {
    let mut cmd = Command::new("stat");
    cmd.args(&["-f", "-L", "-c", "%T"]).arg(path);
    match run_with_deadline(cmd, deadline) {
        DeadlineOutcome::Completed(out) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).trim().to_owned())
        }
        _ => None,
    }
}

/// Sample usage via `df -P -h`; `None` when the query fails or times out.
pub fn usage_probe(
    path: &str,
    extra_df_args: &[String],
    deadline: Duration,
) -> Option<UsageSample> {
    let mut cmd = Command::new("df");
    cmd.arg("-P").arg("-h").args(extra_df_args).arg(path);
    match run_with_deadline(cmd, deadline) {
        DeadlineOutcome::Completed(out) if out.status.success() => {
            UsageSample::from_df_output(&String::from_utf8_lossy(&out.stdout))
        }
        _ => None,
    }
}

/// Marker name unique per host, timestamp, and process, so concurrent
/// invocations on the same host never race on the same file.
fn marker_path(dir: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let nonce: u32 = rand::thread_rng().gen();
    Path::new(dir).join(format!(
        ".mountpoints_wtest_{}_{}.{}.{}",
        hostname(),
        stamp,
        nonce,
        getpid()
    ))
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    nix::unistd::gethostname(&mut buf)
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("localhost")
        .to_owned()
}
