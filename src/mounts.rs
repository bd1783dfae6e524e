//! The static and live mount tables.
//!
//! `MountTab` is the declarative table (fstab or equivalent) with a
//! configurable column layout, and `LiveMounts` is the kernel's runtime
//! view (/proc/mounts or equivalent). Each gets a struct with an
//! associated `load` function, plus string-level parsers for testing.
//!
//! All path lookups are by normalized path: trailing slashes are stripped
//! so `/data/` and `/data` refer to the same mount.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::process::Command;
use std::result::Result as StdResult;
use std::time::Duration;

use crate::probes::{run_with_deadline, DeadlineOutcome};

/// Mount table errors
#[derive(Debug)]
pub enum MountTabError {
    /// Errors originating in IO
    Io(io::Error),
    /// A row is missing one of the columns the layout demands
    InsufficientData(String),
    /// The live table path is missing and `mount(8)` could not stand in
    NoLiveTable(String),
}

impl fmt::Display for MountTabError {
    fn fmt(&self, f: &mut fmt::Formatter) -> StdResult<(), fmt::Error> {
        use self::MountTabError::*;
        match self {
            Io(e) => write!(f, "{}", e),
            InsufficientData(e) => write!(f, "{}", e),
            NoLiveTable(e) => write!(f, "{}", e),
        }
    }
}

impl From<io::Error> for MountTabError {
    fn from(e: io::Error) -> MountTabError {
        MountTabError::Io(e)
    }
}

/// All the results in this module are results with `MountTabError`s
pub type Result<T> = StdResult<T, MountTabError>;

/// Strip trailing slashes so `/data/` and `/data` compare equal.
///
/// The root mount stays `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// 1-based column positions inside a static-table row.
///
/// The defaults fit fstab; platforms with a different table hand in their
/// own positions via the field-override flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabLayout {
    pub device: usize,
    pub mount: usize,
    pub fstype: usize,
    pub options: usize,
}

impl Default for TabLayout {
    fn default() -> TabLayout {
        TabLayout {
            device: 1,
            mount: 2,
            fstype: 3,
            options: 4,
        }
    }
}

/// One row of the static mount table.
///
/// Options are split into a set at parse time so later checks never rescan
/// the comma-joined field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTabRow {
    pub device: String,
    pub path: String,
    pub fs_type: String,
    pub options: HashSet<String>,
    pub dump: Option<u32>,
    pub pass: Option<u32>,
}

impl MountTabRow {
    pub fn has_option(&self, opt: &str) -> bool {
        self.options.contains(opt)
    }
}

/// The static mount table (fstab or equivalent).
#[derive(Debug, Default)]
pub struct MountTab {
    /// Path the table was read from, for messages.
    pub source: String,
    rows: Vec<MountTabRow>,
}

impl MountTab {
    pub fn load(path: &str, layout: TabLayout) -> Result<MountTab> {
        let contents = read_file(path)?;
        let mut tab = MountTab::parse_str(&contents, layout)?;
        tab.source = path.to_owned();
        Ok(tab)
    }

    /// Parse table contents, dropping comment and blank rows.
    pub fn parse_str(contents: &str, layout: TabLayout) -> Result<MountTab> {
        let rows = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| row_from_line(line, layout))
            .collect::<Result<Vec<_>>>()?;
        Ok(MountTab {
            source: String::new(),
            rows,
        })
    }

    pub fn rows(&self) -> &[MountTabRow] {
        &self.rows
    }

    /// Append a synthesized row (e.g. from the ZFS bridge).
    pub fn push(&mut self, row: MountTabRow) {
        self.rows.push(row);
    }

    /// Look up a row by normalized mount path.
    pub fn find(&self, path: &str) -> Option<&MountTabRow> {
        let want = normalize_path(path);
        self.rows.iter().find(|row| row.path == want)
    }
}

fn field(parts: &[&str], column: usize, what: &str, line: &str) -> Result<String> {
    // columns are 1-based; 0 falls through to the same missing-column error
    column
        .checked_sub(1)
        .and_then(|idx| parts.get(idx))
        .map(|s| (*s).to_owned())
        .ok_or_else(|| {
            MountTabError::InsufficientData(format!(
                "missing {} (column {}) in row '{}'",
                what, column, line
            ))
        })
}

fn row_from_line(line: &str, layout: TabLayout) -> Result<MountTabRow> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let options = field(&parts, layout.options, "options", line)?
        .split(',')
        .map(|opt| opt.to_owned())
        .collect();
    // dump and pass live in fstab's fixed columns 5 and 6; a custom layout
    // has no defined positions for them
    let (dump, pass) = if layout == TabLayout::default() {
        (
            parts.get(4).and_then(|v| v.parse().ok()),
            parts.get(5).and_then(|v| v.parse().ok()),
        )
    } else {
        (None, None)
    };
    Ok(MountTabRow {
        device: field(&parts, layout.device, "device", line)?,
        path: normalize_path(&field(&parts, layout.mount, "mount point", line)?),
        fs_type: field(&parts, layout.fstype, "filesystem type", line)?,
        options,
        dump,
        pass,
    })
}

/// One live mount as the kernel reports it.
#[derive(Debug, PartialEq, Eq)]
pub struct LiveMount {
    pub device: String,
    pub path: String,
    pub fs_type: String,
}

/// The live mount table.
#[derive(Debug, Default)]
pub struct LiveMounts(Vec<LiveMount>);

impl LiveMounts {
    /// Load the live table.
    ///
    /// When the mtab path does not exist (platforms without a proc mount
    /// table) the table is synthesized in memory from `mount(8)` output.
    pub fn load(mtab: &str, deadline: Duration) -> Result<LiveMounts> {
        if Path::new(mtab).exists() {
            let contents = read_file(mtab)?;
            Ok(LiveMounts::parse_str(&contents))
        } else {
            LiveMounts::from_mount_command(deadline)
        }
    }

    /// Parse proc-mounts-style contents: `device path fstype opts 0 0`.
    ///
    /// Short rows are dropped rather than erroring; the kernel writes this
    /// file and a torn read should not fail the whole check.
    pub fn parse_str(contents: &str) -> LiveMounts {
        LiveMounts(contents.lines().filter_map(live_mount_from_line).collect())
    }

    // a hung automounter must not stall the check, so even the fallback
    // enumeration runs under the shared deadline
    fn from_mount_command(deadline: Duration) -> Result<LiveMounts> {
        LiveMounts::from_mount_outcome(run_with_deadline(Command::new("mount"), deadline), deadline)
    }

    fn from_mount_outcome(outcome: DeadlineOutcome, deadline: Duration) -> Result<LiveMounts> {
        match outcome {
            DeadlineOutcome::Completed(out) if out.status.success() => Ok(
                LiveMounts::parse_mount_output(&String::from_utf8_lossy(&out.stdout)),
            ),
            DeadlineOutcome::Completed(out) => Err(MountTabError::NoLiveTable(format!(
                "no live mount table and mount(8) exited with {}",
                out.status
            ))),
            DeadlineOutcome::TimedOut => Err(MountTabError::NoLiveTable(format!(
                "no live mount table and mount(8) did not respond in {} sec",
                deadline.as_secs()
            ))),
            DeadlineOutcome::Failed(e) => Err(MountTabError::NoLiveTable(format!(
                "no live mount table and running mount(8) failed: {}",
                e
            ))),
        }
    }

    /// Parse `device on /path type fstype (options)` lines.
    pub fn parse_mount_output(contents: &str) -> LiveMounts {
        LiveMounts(
            contents
                .lines()
                .filter_map(live_mount_from_mount_line)
                .collect(),
        )
    }

    pub fn find(&self, path: &str) -> Option<&LiveMount> {
        let want = normalize_path(path);
        self.0.iter().find(|mount| mount.path == want)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn live_mount_from_line(line: &str) -> Option<LiveMount> {
    let mut parts = line.split_whitespace();
    Some(LiveMount {
        device: parts.next()?.to_owned(),
        path: normalize_path(parts.next()?),
        fs_type: parts.next()?.to_owned(),
    })
}

fn live_mount_from_mount_line(line: &str) -> Option<LiveMount> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let on = parts.iter().position(|p| *p == "on")?;
    let ty = parts.iter().position(|p| *p == "type")?;
    Some(LiveMount {
        device: parts.get(..on)?.join(" "),
        path: normalize_path(parts.get(on + 1)?),
        fs_type: (*parts.get(ty + 1)?).to_owned(),
    })
}

fn read_file(path: &str) -> io::Result<String> {
    let mut fh = File::open(path)?;
    let mut contents = String::new();
    fh.read_to_string(&mut contents)?;
    Ok(contents)
}

#[cfg(test)]
mod unit {
    use super::*;

    static FSTAB: &str = "\
# /etc/fstab: static file system information.
#
/dev/sda1 / ext4 errors=remount-ro 0 1
/dev/sdb1  /data/  xfs  defaults,noauto  0  2
UUID=abc-123 /boot ext2 defaults 0 2

fileserver:/export /mnt/nfs nfs rw,soft 0 0
";

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize_path("/data/"), "/data");
        assert_eq!(normalize_path("/data"), "/data");
        assert_eq!(normalize_path("/a/b//"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn fstab_parse_drops_comments_and_blanks() {
        let tab = MountTab::parse_str(FSTAB, TabLayout::default()).unwrap();
        assert_eq!(tab.rows().len(), 4);
        assert_eq!(tab.rows()[0].path, "/");
        assert_eq!(tab.rows()[0].dump, Some(0));
        assert_eq!(tab.rows()[0].pass, Some(1));
        assert_eq!(tab.rows()[3].fs_type, "nfs");
    }

    #[test]
    fn fstab_options_are_a_set() {
        let tab = MountTab::parse_str(FSTAB, TabLayout::default()).unwrap();
        let data = tab.find("/data").unwrap();
        assert!(data.has_option("noauto"));
        assert!(data.has_option("defaults"));
        assert!(!data.has_option("ro"));
    }

    #[test]
    fn fstab_lookup_normalizes_both_sides() {
        let tab = MountTab::parse_str(FSTAB, TabLayout::default()).unwrap();
        // the table row says /data/, the query says /data
        assert!(tab.find("/data").is_some());
        assert!(tab.find("/boot/").is_some());
        assert!(tab.find("/nope").is_none());
    }

    #[test]
    fn fstab_dump_and_pass_are_optional() {
        let tab =
            MountTab::parse_str("/dev/sda1 / ext4 defaults", TabLayout::default()).unwrap();
        assert_eq!(tab.rows()[0].dump, None);
        assert_eq!(tab.rows()[0].pass, None);
    }

    #[test]
    fn fstab_custom_layout() {
        // vfstab-like: device, fsck-device, mount point, type, pass, boot, options
        let layout = TabLayout {
            device: 1,
            mount: 3,
            fstype: 4,
            options: 7,
        };
        let tab = MountTab::parse_str(
            "/dev/dsk/c0d0s0 /dev/rdsk/c0d0s0 /export ufs 1 yes logging",
            layout,
        )
        .unwrap();
        assert_eq!(tab.rows()[0].device, "/dev/dsk/c0d0s0");
        assert_eq!(tab.rows()[0].path, "/export");
        assert_eq!(tab.rows()[0].fs_type, "ufs");
        assert!(tab.rows()[0].has_option("logging"));
        // fstab's dump/pass columns have no meaning under this layout
        assert_eq!(tab.rows()[0].dump, None);
        assert_eq!(tab.rows()[0].pass, None);
    }

    #[test]
    fn zero_column_is_insufficient_data_not_a_panic() {
        let layout = TabLayout {
            device: 0,
            ..TabLayout::default()
        };
        let err = MountTab::parse_str("/dev/sda1 / ext4 defaults 0 1", layout).unwrap_err();
        match err {
            MountTabError::InsufficientData(msg) => assert!(msg.contains("column 0")),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn fstab_short_row_is_insufficient_data() {
        let err = MountTab::parse_str("/dev/sda1 /", TabLayout::default()).unwrap_err();
        match err {
            MountTabError::InsufficientData(msg) => assert!(msg.contains("missing options")),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn live_mounts_parse() {
        let live = LiveMounts::parse_str(
            "sysfs /sys sysfs rw,nosuid,nodev 0 0
/dev/sda1 / ext4 rw,relatime,errors=remount-ro 0 0
fileserver:/export /mnt/nfs/ nfs rw,soft 0 0
",
        );
        assert_eq!(live.len(), 3);
        assert!(live.find("/mnt/nfs").is_some());
        assert!(live.find("/sys/").is_some());
        assert!(live.find("/mnt").is_none());
    }

    #[test]
    fn live_mounts_from_mount_output() {
        let live = LiveMounts::parse_mount_output(
            "sysfs on /sys type sysfs (rw,nosuid,nodev,noexec)
/dev/sda1 on / type ext4 (rw,relatime)
map auto_home on /home type autofs (autofs)
",
        );
        assert_eq!(live.len(), 3);
        let home = live.find("/home").unwrap();
        assert_eq!(home.device, "map auto_home");
        assert_eq!(home.fs_type, "autofs");
    }

    #[test]
    fn mount_fallback_maps_each_outcome() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::Output;

        let deadline = Duration::from_secs(3);
        let ok = Output {
            status: ExitStatusExt::from_raw(0),
            stdout: b"/dev/sda1 on / type ext4 (rw)\n".to_vec(),
            stderr: Vec::new(),
        };
        let live =
            LiveMounts::from_mount_outcome(DeadlineOutcome::Completed(ok), deadline).unwrap();
        assert!(live.find("/").is_some());

        let err = LiveMounts::from_mount_outcome(DeadlineOutcome::TimedOut, deadline).unwrap_err();
        match err {
            MountTabError::NoLiveTable(msg) => assert!(msg.contains("did not respond in 3 sec")),
            other => panic!("expected NoLiveTable, got {:?}", other),
        }
    }
}
