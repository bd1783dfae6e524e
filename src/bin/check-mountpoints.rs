//! Check that mount points are present, responsive, and healthy

#[macro_use]
extern crate serde_derive;

use std::time::Duration;

use structopt::StructOpt;
use syslog::{BasicLogger, Facility, Formatter3164};

use mount_plugins::check::{self, CheckConfig};
use mount_plugins::cleanup;
use mount_plugins::mounts::{LiveMounts, MountTab, TabLayout};
use mount_plugins::probes::SystemProber;
use mount_plugins::selector::{self, Mode};
use mount_plugins::usage::Thresholds;
use mount_plugins::zfs;
use mount_plugins::Status;

/// Check that the given mount points exist in the static mount table, are
/// currently mounted, and respond before going stale.
#[derive(StructOpt, Debug, Deserialize)]
#[structopt(
    name = "check-mountpoints (part of mount-plugins)",
    setting = structopt::clap::AppSettings::ColoredHelp,
    after_help = "Examples:

    Check two specific mounts, requiring nfs on the second:

        check-mountpoints -t ',nfs' /data /mnt/nfs

    Autodiscover everything interesting in fstab, write-testing each mount,
    and tolerate a host with no external mounts at all:

        check-mountpoints -A -w

    Alert on disk usage as well, warning at 80% and critical at 90%:

        check-mountpoints -a -W 80 -C 90"
)]
struct Args {
    #[structopt(
        short = "m",
        long = "mtab",
        default_value = "/proc/mounts",
        help = "Path to the live mount table. If it does not exist the \
                output of mount(8) is parsed instead."
    )]
    mtab: String,
    #[structopt(
        short = "f",
        long = "fstab",
        default_value = "/etc/fstab",
        help = "Path to the static mount table"
    )]
    fstab: String,
    #[structopt(
        short = "M",
        long = "device-field",
        default_value = "1",
        help = "1-based column of the device in the static table"
    )]
    device_field: usize,
    #[structopt(
        short = "N",
        long = "mount-field",
        default_value = "2",
        help = "1-based column of the mount point in the static table"
    )]
    mount_field: usize,
    #[structopt(
        short = "O",
        long = "option-field",
        default_value = "4",
        help = "1-based column of the mount options in the static table"
    )]
    option_field: usize,
    #[structopt(
        short = "T",
        long = "time-till-stale",
        default_value = "3",
        help = "Seconds a mount may take to respond before it counts as stale"
    )]
    time_till_stale: u64,
    #[structopt(
        short = "L",
        long = "accept-symlinks",
        help = "Accept an unmounted path if it is a symlink"
    )]
    accept_symlinks: bool,
    #[structopt(
        short = "i",
        long = "ignore-fstab",
        help = "Do not require mounts to be listed in the static table"
    )]
    ignore_fstab: bool,
    #[structopt(
        short = "a",
        long = "autodiscover",
        help = "Discover mounts to check from the static table instead of \
                listing them"
    )]
    autodiscover: bool,
    #[structopt(
        short = "A",
        long = "autodiscover-ok-if-empty",
        help = "Like --autodiscover, but exit OK when nothing is discovered"
    )]
    autodiscover_ok_if_empty: bool,
    #[structopt(
        short = "E",
        long = "exclude",
        help = "Regex of mount points to skip during autodiscovery"
    )]
    exclude: Option<String>,
    #[structopt(
        short = "n",
        long = "respect-noauto",
        help = "Skip autodiscovered mounts carrying the noauto option"
    )]
    respect_noauto: bool,
    #[structopt(
        short = "w",
        long = "writetest",
        help = "Verify each mount by creating and removing a marker file"
    )]
    writetest: bool,
    #[structopt(
        short = "e",
        long = "df-args",
        help = "Extra whitespace-separated arguments passed to df"
    )]
    df_args: Option<String>,
    #[structopt(
        short = "t",
        long = "fs-types",
        help = "Comma-separated expected filesystem types, matched to the \
                mount points by position. An empty slot skips the check."
    )]
    fs_types: Option<String>,
    #[structopt(
        short = "W",
        long = "warn",
        help = "Percent usage to warn at. Requires --crit."
    )]
    warn: Option<u8>,
    #[structopt(
        short = "C",
        long = "crit",
        help = "Percent usage to go critical at. Requires --warn."
    )]
    crit: Option<u8>,
    #[structopt(help = "Mount points to check, unless autodiscovering")]
    mountpoints: Vec<String>,
}

/// Column overrides are 1-based; zero would never match a column and is
/// rejected before any table is read.
fn build_layout(device: usize, mount: usize, options: usize) -> Result<TabLayout, String> {
    if device == 0 || mount == 0 || options == 0 {
        return Err("field overrides are 1-based; 0 is not a valid column".to_owned());
    }
    Ok(TabLayout {
        device,
        mount,
        options,
        ..TabLayout::default()
    })
}

fn split_df_args(raw: &Option<String>) -> Vec<String> {
    match raw {
        Some(raw) => raw.split_whitespace().map(str::to_owned).collect(),
        None => Vec::new(),
    }
}

fn split_fs_types(raw: &Option<String>) -> Vec<String> {
    match raw {
        Some(raw) => raw.split(',').map(|t| t.trim().to_owned()).collect(),
        None => Vec::new(),
    }
}

/// Syslog is the secondary channel; stdout stays reserved for the report.
/// A host without a syslog socket just goes without.
fn init_syslog() {
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "check-mountpoints".into(),
        pid: std::process::id(),
    };
    if let Ok(logger) = syslog::unix(formatter) {
        if log::set_boxed_logger(Box::new(BasicLogger::new(logger))).is_ok() {
            log::set_max_level(log::LevelFilter::Warn);
        }
    }
}

fn main() {
    let args = Args::from_args();
    cleanup::install();
    init_syslog();

    let thresholds = match Thresholds::from_args(args.warn, args.crit) {
        Ok(thresholds) => thresholds,
        Err(msg) => {
            println!("UNKNOWN: {}", msg);
            cleanup::finish(Status::Unknown);
        }
    };

    let layout = match build_layout(args.device_field, args.mount_field, args.option_field) {
        Ok(layout) => layout,
        Err(msg) => {
            println!("UNKNOWN: {}", msg);
            cleanup::finish(Status::Unknown);
        }
    };
    let deadline = Duration::from_secs(args.time_till_stale);
    let autodiscover = args.autodiscover || args.autodiscover_ok_if_empty;
    let mut fstab = match MountTab::load(&args.fstab, layout) {
        Ok(tab) => tab,
        // without autodiscovery an ignored table may simply be absent
        Err(_) if args.ignore_fstab && !autodiscover => MountTab::default(),
        Err(e) => {
            println!("CRITICAL: could not read {}: {}", args.fstab, e);
            cleanup::finish(Status::Critical);
        }
    };
    for row in zfs::discover(deadline) {
        fstab.push(row);
    }

    let mode = if autodiscover {
        let exclude = match selector::compile_exclude(&args.exclude) {
            Ok(exclude) => exclude,
            Err(msg) => {
                println!("UNKNOWN: {}", msg);
                cleanup::finish(Status::Unknown);
            }
        };
        Mode::Autodiscover {
            exclude,
            respect_noauto: args.respect_noauto,
        }
    } else {
        Mode::Explicit(args.mountpoints.clone())
    };

    let candidates = selector::select(&mode, &fstab);
    if candidates.is_empty() {
        if args.autodiscover_ok_if_empty {
            println!("OK: no external mounts were found in {}", args.fstab);
            cleanup::finish(Status::Ok);
        }
        println!(
            "UNKNOWN: no mount points to check; list some or pass \
             --autodiscover"
        );
        cleanup::finish(Status::Unknown);
    }

    let live = match LiveMounts::load(&args.mtab, deadline) {
        Ok(live) => live,
        Err(e) => {
            println!("CRITICAL: could not read live mounts: {}", e);
            cleanup::finish(Status::Critical);
        }
    };

    let config = CheckConfig {
        deadline,
        accept_symlinks: args.accept_symlinks,
        ignore_fstab: args.ignore_fstab,
        write_test: args.writetest,
        df_args: split_df_args(&args.df_args),
        expected_types: split_fs_types(&args.fs_types),
        thresholds,
        in_container: check::detect_container(),
    };

    let mut prober = SystemProber;
    let state = check::run_checks(&candidates, &fstab, &live, &config, &mut prober);
    let report = check::render_report(&candidates, &state, thresholds);
    for line in &report.lines {
        println!("{}", line);
    }
    cleanup::finish(report.status);
}

#[cfg(test)]
mod unit {
    use structopt::StructOpt;

    use super::{build_layout, split_df_args, split_fs_types, Args};

    #[test]
    fn validate_args_defaults() {
        let args = Args::from_iter(["arg0", "/data"].iter());
        assert_eq!(args.mtab, "/proc/mounts");
        assert_eq!(args.fstab, "/etc/fstab");
        assert_eq!(args.time_till_stale, 3);
        assert_eq!(args.mountpoints, vec!["/data".to_owned()]);
        assert!(!args.autodiscover);
        assert!(!args.writetest);
        assert_eq!(args.warn, None);
    }

    #[test]
    fn validate_args_flags() {
        let args = Args::from_iter(
            [
                "arg0", "-A", "-w", "-L", "-T", "10", "-E", "^/mnt", "-W", "80", "-C", "90",
            ]
            .iter(),
        );
        assert!(args.autodiscover_ok_if_empty);
        assert!(args.writetest);
        assert!(args.accept_symlinks);
        assert_eq!(args.time_till_stale, 10);
        assert_eq!(args.exclude.as_deref(), Some("^/mnt"));
        assert_eq!(args.warn, Some(80));
        assert_eq!(args.crit, Some(90));
    }

    #[test]
    fn validate_args_field_overrides() {
        let args = Args::from_iter(["arg0", "-M", "1", "-N", "3", "-O", "7", "/export"].iter());
        assert_eq!(args.device_field, 1);
        assert_eq!(args.mount_field, 3);
        assert_eq!(args.option_field, 7);
    }

    #[test]
    fn zero_field_overrides_are_rejected() {
        assert!(build_layout(0, 2, 4).is_err());
        assert!(build_layout(1, 0, 4).is_err());
        assert!(build_layout(1, 2, 0).is_err());
        let layout = build_layout(1, 3, 7).unwrap();
        assert_eq!(layout.mount, 3);
        // fs-type stays in its fstab column
        assert_eq!(layout.fstype, 3);
    }

    #[test]
    fn df_args_split_on_whitespace() {
        assert_eq!(
            split_df_args(&Some("-x nfs  -l".to_owned())),
            vec!["-x".to_owned(), "nfs".to_owned(), "-l".to_owned()]
        );
        assert!(split_df_args(&None).is_empty());
    }

    #[test]
    fn fs_types_keep_empty_positional_slots() {
        assert_eq!(
            split_fs_types(&Some(",nfs,ext4".to_owned())),
            vec!["".to_owned(), "nfs".to_owned(), "ext4".to_owned()]
        );
        assert!(split_fs_types(&None).is_empty());
    }
}
