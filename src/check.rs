//! The per-mount check pipeline and overall status resolution.
//!
//! For every candidate mount, in order: static-table presence, live-mount
//! presence, stale probe, existence/write/type checks, usage aggregation.
//! Failures are accumulated, never retracted, and never abort the loop;
//! the overall status falls out of a strict precedence once every mount
//! has been seen.

use std::path::Path;
use std::time::Duration;

use log::warn;

use crate::cleanup;
use crate::mounts::{LiveMounts, MountTab};
use crate::probes::{ProbeOutcome, Prober, WriteOutcome};
use crate::selector::{MountCandidate, Source};
use crate::usage::{Thresholds, UsageClass, UsageSample};
use crate::Status;

/// Marker files whose presence means we run inside a container, where
/// static-table bookkeeping is the host's business, not ours.
static CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];

pub fn detect_container() -> bool {
    CONTAINER_MARKERS.iter().any(|m| Path::new(m).exists())
}

/// Settings the orchestrator consumes; parsed and validated by the binary
/// before any mount is touched.
#[derive(Debug)]
pub struct CheckConfig {
    pub deadline: Duration,
    pub accept_symlinks: bool,
    pub ignore_fstab: bool,
    pub write_test: bool,
    pub df_args: Vec<String>,
    /// Expected filesystem types, matched to the candidate order by
    /// position. An empty slot means no expectation for that mount.
    pub expected_types: Vec<String>,
    pub thresholds: Option<Thresholds>,
    pub in_container: bool,
}

/// Append-only accumulator for one run. Owned by the orchestrator,
/// read once by the reporter.
#[derive(Debug, Default)]
pub struct AggregateState {
    pub error_messages: Vec<String>,
    pub warn_count: u32,
    pub crit_count: u32,
    pub perf_tokens: Vec<String>,
    pub info_lines: Vec<String>,
}

/// Drive the pipeline over every candidate, strictly one at a time.
pub fn run_checks<P: Prober>(
    candidates: &[MountCandidate],
    fstab: &MountTab,
    live: &LiveMounts,
    config: &CheckConfig,
    prober: &mut P,
) -> AggregateState {
    let mut state = AggregateState::default();
    for (position, candidate) in candidates.iter().enumerate() {
        cleanup::exit_if_signaled();
        check_mount(candidate, position, fstab, live, config, prober, &mut state);
    }
    state
}

fn check_mount<P: Prober>(
    candidate: &MountCandidate,
    position: usize,
    fstab: &MountTab,
    live: &LiveMounts,
    config: &CheckConfig,
    prober: &mut P,
    state: &mut AggregateState,
) {
    let path = &candidate.path;
    let autodiscovered = candidate.source == Source::Autodiscovered;

    // 1. static-table presence; autodiscovered mounts came from the table
    let skip_fstab = config.in_container || autodiscovered || config.ignore_fstab;
    if !skip_fstab && fstab.find(path).is_none() {
        record_error(state, format!("{} is not in {}!", path, table_name(fstab)));
    }

    // 2. live-mount presence
    if live.find(path).is_none() && !(config.accept_symlinks && prober.is_symlink(path)) {
        record_error(state, format!("{} is not mounted!", path));
    }

    // 3. stale probe
    let mut stale = false;
    match prober.stale(path, &config.df_args, config.deadline) {
        ProbeOutcome::Responsive => {}
        ProbeOutcome::Stale { after } => {
            stale = true;
            record_error(
                state,
                format!(
                    "{} did not respond in {} sec. Seems to be stale.",
                    path,
                    after.as_secs()
                ),
            );
        }
        ProbeOutcome::ProbeError(cause) => {
            // not fatal to the mount; downstream checks still run
            warn!("stale probe errored for {}: {}", path, cause);
        }
    }

    // 4. existence / write / type; a stale mount gets none of these
    if !stale {
        if !prober.is_dir(path) {
            record_error(state, format!("{} doesn't exist on filesystem!", path));
        } else {
            if config.write_test {
                run_write_check(candidate, fstab, config, prober, state);
            }
            if let Some(expected) = expected_type(config, position) {
                run_type_check(path, expected, config, prober, state);
            }
        }
    }

    // 5. usage aggregation, always, so the perf line stays complete
    match prober.usage(path, &config.df_args, config.deadline) {
        Some(sample) => aggregate_usage(path, &sample, config.thresholds, state),
        None => warn!(
            "could not sample usage for {}, perf data will be incomplete",
            path
        ),
    }
}

/// The expected type for a candidate position, if the caller supplied one.
fn expected_type(config: &CheckConfig, position: usize) -> Option<&str> {
    config
        .expected_types
        .get(position)
        .map(String::as_str)
        .filter(|t| !t.is_empty())
}

fn run_write_check<P: Prober>(
    candidate: &MountCandidate,
    fstab: &MountTab,
    config: &CheckConfig,
    prober: &mut P,
    state: &mut AggregateState,
) {
    let path = &candidate.path;
    if candidate.source == Source::Autodiscovered {
        if let Some(row) = fstab.find(path) {
            if row.has_option("ro") {
                // never attempt a mutation the table says will fail
                record_error(
                    state,
                    format!("Could not write in {} filesystem was mounted RO.", path),
                );
                return;
            }
        }
    }
    match prober.write(path, config.deadline) {
        WriteOutcome::Written => {}
        WriteOutcome::TimedOut => record_error(
            state,
            format!(
                "Could not write in {} in {} sec. Seems to be stale.",
                path,
                config.deadline.as_secs()
            ),
        ),
        WriteOutcome::Failed => record_error(state, format!("Could not write in {}!", path)),
    }
}

fn run_type_check<P: Prober>(
    path: &str,
    expected: &str,
    config: &CheckConfig,
    prober: &mut P,
    state: &mut AggregateState,
) {
    match prober.fs_type(path, config.deadline) {
        None => record_error(
            state,
            format!("Could not fetch filesystem type for {}!", path),
        ),
        Some(ref actual) if actual != expected => record_error(
            state,
            format!(
                "{} has bad filesystem type: got {} expected {}!",
                path, actual, expected
            ),
        ),
        Some(_) => {}
    }
}

fn aggregate_usage(
    path: &str,
    sample: &UsageSample,
    thresholds: Option<Thresholds>,
    state: &mut AggregateState,
) {
    match sample.classify(thresholds) {
        UsageClass::Critical => state.crit_count += 1,
        UsageClass::Warning => state.warn_count += 1,
        UsageClass::Ok => {}
    }
    let (avail, used) = sample.perf_tokens(path, thresholds);
    state.perf_tokens.push(avail);
    state.perf_tokens.push(used);
    state.info_lines.push(sample.info_line(path));
}

fn record_error(state: &mut AggregateState, message: String) {
    warn!("{}", message);
    state.error_messages.push(message);
}

fn table_name(fstab: &MountTab) -> &str {
    if fstab.source.is_empty() {
        "fstab"
    } else {
        fstab.source.as_str()
    }
}

/// The final report: what to print and how to exit.
#[derive(Debug, PartialEq, Eq)]
pub struct Report {
    pub status: Status,
    pub lines: Vec<String>,
}

/// Apply the precedence rules.
///
/// Hard errors beat threshold criticals beat threshold warnings beat OK,
/// and the hard-error branch never prints threshold or perf output.
pub fn render_report(
    candidates: &[MountCandidate],
    state: &AggregateState,
    thresholds: Option<Thresholds>,
) -> Report {
    if !state.error_messages.is_empty() {
        return Report {
            status: Status::Critical,
            lines: vec![format!("CRITICAL: {}", state.error_messages.join(" ; "))],
        };
    }

    let listed = candidates
        .iter()
        .map(|c| c.path.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let (status, summary) = if state.crit_count > 0 {
        (
            Status::Critical,
            format!(
                "CRITICAL: All mounts ({}) were found, but critical threshold exceeded.",
                listed
            ),
        )
    } else if state.warn_count > 0 {
        (
            Status::Warning,
            format!(
                "WARNING: All mounts ({}) were found, but warning threshold exceeded.",
                listed
            ),
        )
    } else if thresholds.is_some() {
        (
            Status::Ok,
            format!(
                "OK: All mounts ({}) were found, no thresholds exceeded.",
                listed
            ),
        )
    } else {
        (
            Status::Ok,
            format!(
                "OK: All mounts ({}) were found, no thresholds defined.",
                listed
            ),
        )
    };

    let mut lines = vec![summary];
    lines.extend(state.info_lines.iter().cloned());
    lines.push(format!("| {}", state.perf_tokens.join(" ")));
    Report { status, lines }
}
