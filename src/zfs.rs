//! Bridge to ZFS-managed volumes.
//!
//! Datasets that ZFS mounts on its own never appear in fstab, so without
//! this bridge autodiscovery would miss them and the fstab-presence check
//! would flag them. `zfs list` output is turned into synthetic
//! static-table rows in memory; nothing is written to disk.

use std::collections::HashSet;
use std::process::Command;
use std::time::Duration;

use crate::mounts::{normalize_path, MountTabRow};
use crate::probes::{run_with_deadline, DeadlineOutcome};

/// Enumerate mount-eligible ZFS datasets as synthetic static-table rows.
///
/// The listing runs under the shared deadline so a hung pool cannot stall
/// the whole check.
pub fn discover(deadline: Duration) -> Vec<MountTabRow> {
    let mut cmd = Command::new("zfs");
    cmd.args(&[
        "list",
        "-H",
        "-t",
        "filesystem",
        "-o",
        "name,mountpoint,canmount",
    ]);
    rows_from_outcome(run_with_deadline(cmd, deadline))
}

/// A host without a working `zfs` binary, or one whose listing fails or
/// times out, simply contributes nothing.
fn rows_from_outcome(outcome: DeadlineOutcome) -> Vec<MountTabRow> {
    match outcome {
        DeadlineOutcome::Completed(out) if out.status.success() => {
            parse_list(&String::from_utf8_lossy(&out.stdout))
        }
        _ => Vec::new(),
    }
}

fn parse_list(contents: &str) -> Vec<MountTabRow> {
    contents.lines().filter_map(row_from_dataset).collect()
}

/// One `name<TAB>mountpoint<TAB>canmount` line.
///
/// Only datasets with `canmount=on` and a real mountpoint are eligible;
/// `legacy` and `none` mountpoints are managed through fstab already.
fn row_from_dataset(line: &str) -> Option<MountTabRow> {
    let mut parts = line.split('\t');
    let name = parts.next()?;
    let mountpoint = parts.next()?;
    let canmount = parts.next()?.trim();
    if canmount != "on" || !mountpoint.starts_with('/') {
        return None;
    }
    let mut options = HashSet::new();
    options.insert("defaults".to_owned());
    Some(MountTabRow {
        device: name.to_owned(),
        path: normalize_path(mountpoint),
        fs_type: "zfs".to_owned(),
        options,
        dump: None,
        pass: None,
    })
}
