//! Mount Plugins: strongly typed mount point health checks
//!
//! The goal is a drop-in replacement for the classic shell mount-point
//! checks, strongly typed and fast to execute, because your monitoring
//! system shouldn't page you over a typo in an awk one-liner.
//!
//! The crate is a library plus one binary, `check-mountpoints`, which
//! resolves a set of mount points (an explicit list or autodiscovery from
//! the static mount table), cross-references them against the live kernel
//! mount table, detects stale mounts under a deadline, optionally verifies
//! writability and on-disk filesystem type, and reports usage against
//! warning/critical thresholds in the standard monitoring-plugin format.

use std::fmt;
use std::process;

pub mod check;
pub mod cleanup;
pub mod mounts;
pub mod probes;
pub mod selector;
pub mod usage;
pub mod zfs;

/// The four-valued monitoring-plugin exit contract.
///
/// Ordered so that `std::cmp::max` always escalates towards the worse
/// status.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Status {
    /// Exit the process with the code monitoring frameworks expect.
    pub fn exit(self) -> ! {
        use crate::Status::*;
        match self {
            Ok => process::exit(0),
            Warning => process::exit(1),
            Critical => process::exit(2),
            Unknown => process::exit(3),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod unit {
    use std::cmp::max;

    use super::Status;

    #[test]
    fn max_escalates() {
        assert_eq!(max(Status::Ok, Status::Warning), Status::Warning);
        assert_eq!(max(Status::Critical, Status::Warning), Status::Critical);
        assert_eq!(max(Status::Ok, Status::Ok), Status::Ok);
    }

    #[test]
    fn display_matches_plugin_convention() {
        assert_eq!(format!("{}", Status::Ok), "OK");
        assert_eq!(format!("{}", Status::Critical), "CRITICAL");
    }
}
