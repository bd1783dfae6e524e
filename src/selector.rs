//! Resolve which mount points a run will check.
//!
//! Either the caller lists them explicitly, or they are autodiscovered by
//! scanning the static mount table. Candidate order is the input/table
//! scan order; it drives output ordering and the positional matching of
//! expected filesystem types, and it is stable across runs on an
//! unchanged table.

use std::collections::HashSet;

use regex::Regex;

use crate::mounts::{normalize_path, MountTab};

/// Filesystem types eligible for autodiscovery from the static table.
///
/// Everything else (swap, proc, tmpfs, bind mounts of the initramfs
/// variety) is nothing a mount check should page anyone about.
pub static AUTODISCOVER_FS_TYPES: &[&str] = &[
    "ext2",
    "ext3",
    "ext4",
    "xfs",
    "auto",
    "nfs",
    "nfs4",
    "davfs",
    "cifs",
    "fuse",
    "glusterfs",
    "ocfs2",
    "lustre",
    "ufs",
    "zfs",
    "ceph",
    "btrfs",
    "fuse.s3fs",
];

/// Where a candidate mount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Explicit,
    Autodiscovered,
}

/// One mount point scheduled for checking. Path is normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountCandidate {
    pub path: String,
    pub source: Source,
}

/// How the candidate set is chosen.
#[derive(Debug)]
pub enum Mode {
    /// Check exactly the paths the caller listed.
    Explicit(Vec<String>),
    /// Scan the static table for eligible rows.
    Autodiscover {
        exclude: Option<Regex>,
        respect_noauto: bool,
    },
}

/// Compile the optional exclude pattern, with a readable error.
pub fn compile_exclude(pattern: &Option<String>) -> Result<Option<Regex>, String> {
    match pattern {
        Some(pattern) => match Regex::new(pattern) {
            Ok(re) => Ok(Some(re)),
            Err(e) => Err(format!(
                "unable to exclude mounts like {:?}: {}",
                pattern, e
            )),
        },
        None => Ok(None),
    }
}

/// Produce the ordered candidate set. Duplicates are dropped, keeping the
/// first occurrence, so no mount is ever probed twice.
pub fn select(mode: &Mode, tab: &MountTab) -> Vec<MountCandidate> {
    let candidates: Vec<MountCandidate> = match mode {
        Mode::Explicit(paths) => paths
            .iter()
            .map(|path| MountCandidate {
                path: normalize_path(path),
                source: Source::Explicit,
            })
            .collect(),
        Mode::Autodiscover {
            exclude,
            respect_noauto,
        } => tab
            .rows()
            .iter()
            .filter(|row| AUTODISCOVER_FS_TYPES.contains(&row.fs_type.as_str()))
            .filter(|row| match exclude {
                Some(re) => !re.is_match(&row.path),
                None => true,
            })
            .filter(|row| !(*respect_noauto && row.has_option("noauto")))
            .map(|row| MountCandidate {
                path: row.path.clone(),
                source: Source::Autodiscovered,
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.path.clone()))
        .collect()
}

#[cfg(test)]
mod unit {
    use super::*;
    use crate::mounts::TabLayout;

    static FSTAB: &str = "\
/dev/sda1 / ext4 errors=remount-ro 0 1
/dev/sda2 none swap sw 0 0
proc /proc proc defaults 0 0
/dev/sdb1 /data xfs defaults 0 2
fileserver:/export /mnt/nfs nfs rw,soft,noauto 0 0
/dev/sdc1 /backup ext4 ro 0 2
";

    fn tab() -> MountTab {
        MountTab::parse_str(FSTAB, TabLayout::default()).unwrap()
    }

    fn paths(candidates: &[MountCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.path.as_str()).collect()
    }

    #[test]
    fn explicit_mode_normalizes_and_keeps_order() {
        let mode = Mode::Explicit(vec!["/data/".to_owned(), "/mnt/nfs".to_owned()]);
        let candidates = select(&mode, &tab());
        assert_eq!(paths(&candidates), ["/data", "/mnt/nfs"]);
        assert!(candidates.iter().all(|c| c.source == Source::Explicit));
    }

    #[test]
    fn explicit_mode_drops_duplicates() {
        let mode = Mode::Explicit(vec!["/data".to_owned(), "/data/".to_owned()]);
        assert_eq!(paths(&select(&mode, &tab())), ["/data"]);
    }

    #[test]
    fn autodiscovery_follows_table_scan_order() {
        let mode = Mode::Autodiscover {
            exclude: None,
            respect_noauto: false,
        };
        // swap and proc rows are not eligible types
        assert_eq!(
            paths(&select(&mode, &tab())),
            ["/", "/data", "/mnt/nfs", "/backup"]
        );
    }

    #[test]
    fn autodiscovery_is_idempotent() {
        let mode = Mode::Autodiscover {
            exclude: None,
            respect_noauto: false,
        };
        assert_eq!(select(&mode, &tab()), select(&mode, &tab()));
    }

    #[test]
    fn exclude_pattern_filters_paths() {
        let mode = Mode::Autodiscover {
            exclude: compile_exclude(&Some("^/mnt".to_owned())).unwrap(),
            respect_noauto: false,
        };
        assert_eq!(paths(&select(&mode, &tab())), ["/", "/data", "/backup"]);
    }

    #[test]
    fn respect_noauto_drops_flagged_rows() {
        let mode = Mode::Autodiscover {
            exclude: None,
            respect_noauto: true,
        };
        assert_eq!(paths(&select(&mode, &tab())), ["/", "/data", "/backup"]);
    }

    #[test]
    fn empty_autodiscovery_is_not_an_error() {
        let empty = MountTab::parse_str("", TabLayout::default()).unwrap();
        let mode = Mode::Autodiscover {
            exclude: None,
            respect_noauto: false,
        };
        assert!(select(&mode, &empty).is_empty());
    }

    #[test]
    fn bad_exclude_pattern_is_readable() {
        let err = compile_exclude(&Some("[hello".to_owned())).unwrap_err();
        assert!(err.contains("unable to exclude mounts like"));
    }
}
