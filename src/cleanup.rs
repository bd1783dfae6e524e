//! Scratch-file cleanup and signal plumbing.
//!
//! Every file the plugin creates as a byproduct (write-probe markers) is
//! registered here so it is removed on every exit path: normal return,
//! termination-class signal, or panic. Signals are noted by the handler
//! and acted on at the next probe boundary; since every probe is itself
//! deadline-bounded, the response time stays bounded too.
//!
//! Exit codes: signals map to `128 + signo` (one code per signal kind),
//! the panic trap to 4, keeping both distinguishable from the four-valued
//! monitoring contract.

use std::convert::TryFrom;
use std::fs;
use std::os::raw::c_int;
use std::panic;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::error;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::Status;

lazy_static! {
    static ref SCRATCH: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
}

/// 0 until a termination-class signal arrives.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Exit code for the panic trap.
const PANIC_EXIT_CODE: i32 = 4;

/// Track a scratch path so an abnormal exit still removes it.
pub fn register(path: &Path) {
    if let Ok(mut scratch) = SCRATCH.lock() {
        scratch.push(path.to_path_buf());
    }
}

/// Stop tracking a scratch path once it is gone.
pub fn deregister(path: &Path) {
    if let Ok(mut scratch) = SCRATCH.lock() {
        scratch.retain(|p| p != path);
    }
}

/// Remove every registered scratch file. Best effort.
pub fn remove_scratch() {
    if let Ok(mut scratch) = SCRATCH.lock() {
        for path in scratch.drain(..) {
            let _ = fs::remove_file(&path);
        }
    }
}

extern "C" fn note_signal(signo: c_int) {
    PENDING_SIGNAL.store(signo, Ordering::SeqCst);
}

/// Install the signal handlers and the panic trap. Called once at startup.
pub fn install() {
    let action = SigAction::new(
        SigHandler::Handler(note_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in &[Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        unsafe {
            let _ = sigaction(*signal, &action);
        }
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        default_hook(info);
        error!("internal error: {}", info);
        remove_scratch();
        process::exit(PANIC_EXIT_CODE);
    }));
}

/// If a signal arrived, clean up, log it, and exit `128 + signo`.
///
/// Called at probe boundaries by the orchestrator.
pub fn exit_if_signaled() {
    let signo = PENDING_SIGNAL.load(Ordering::SeqCst);
    if signo == 0 {
        return;
    }
    remove_scratch();
    let name = Signal::try_from(signo)
        .map(|s| s.as_str())
        .unwrap_or("signal");
    error!("caught {} mid-check, aborting", name);
    eprintln!("UNKNOWN: caught {} mid-check, aborting", name);
    process::exit(128 + signo);
}

/// Remove scratch files and exit: the single exit point for the binary.
pub fn finish(status: Status) -> ! {
    remove_scratch();
    status.exit()
}

#[cfg(test)]
mod unit {
    use std::fs::File;

    use super::*;

    // one test for the whole registry flow: the registry is process-wide
    // and parallel tests would race on it
    #[test]
    fn registry_flow() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept");
        let removed = dir.path().join("removed");
        File::create(&kept).unwrap();
        File::create(&removed).unwrap();

        register(&kept);
        register(&removed);
        deregister(&kept);
        remove_scratch();

        assert!(kept.exists());
        assert!(!removed.exists());
        // removing again is harmless even though the files are gone
        remove_scratch();
    }
}
