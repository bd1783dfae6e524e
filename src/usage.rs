//! Disk-usage samples and threshold classification.
//!
//! The available-space figure is passed through exactly as the usage query
//! printed it; graphing backends get the same human-readable value an
//! operator running `df -h` would see.

/// Warning/critical percent thresholds. Always configured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warn: u8,
    pub crit: u8,
}

impl Thresholds {
    /// Validate the threshold flags before any mount is touched.
    ///
    /// Both must be given together and warning must not exceed critical.
    pub fn from_args(warn: Option<u8>, crit: Option<u8>) -> Result<Option<Thresholds>, String> {
        match (warn, crit) {
            (None, None) => Ok(None),
            (Some(warn), Some(crit)) => {
                if warn > crit {
                    Err(format!(
                        "warning threshold ({}) must not exceed critical threshold ({})",
                        warn, crit
                    ))
                } else {
                    Ok(Some(Thresholds { warn, crit }))
                }
            }
            _ => Err("--warn and --crit must be given together".to_owned()),
        }
    }
}

/// How a sample compares against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageClass {
    Ok,
    Warning,
    Critical,
}

/// One usage sample for a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSample {
    /// Available space exactly as the usage query printed it, e.g. `42G`.
    pub available: String,
    pub used_percent: u8,
}

impl UsageSample {
    /// Parse the data line of `df -P` output.
    ///
    /// Columns: filesystem, size, used, avail, capacity, mount point. The
    /// header is skipped by taking the last non-empty line; fields are
    /// counted from the end in case the device name contains spaces.
    pub fn from_df_output(output: &str) -> Option<UsageSample> {
        let line = output.lines().filter(|l| !l.trim().is_empty()).last()?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            return None;
        }
        let available = parts[parts.len() - 3].to_owned();
        let used_percent = parts[parts.len() - 2].trim_end_matches('%').parse().ok()?;
        Some(UsageSample {
            available,
            used_percent,
        })
    }

    /// Classify against the thresholds, critical first.
    ///
    /// Comparisons are strict `>`: a mount sitting exactly on a threshold
    /// is still on the good side of it.
    pub fn classify(&self, thresholds: Option<Thresholds>) -> UsageClass {
        match thresholds {
            Some(t) if self.used_percent > t.crit => UsageClass::Critical,
            Some(t) if self.used_percent > t.warn => UsageClass::Warning,
            _ => UsageClass::Ok,
        }
    }

    /// The two perf tokens for this mount, in the fixed
    /// `'label'=value;warn;crit;min;max` format.
    pub fn perf_tokens(&self, path: &str, thresholds: Option<Thresholds>) -> (String, String) {
        let avail = format!("'{}_space_avail'={};;;;", path, self.available);
        let used = match thresholds {
            Some(t) => format!(
                "'{}_used_percent'={};{};{};;",
                path, self.used_percent, t.warn, t.crit
            ),
            None => format!("'{}_used_percent'={};;;;", path, self.used_percent),
        };
        (avail, used)
    }

    /// The human-readable per-mount line for the itemized report.
    pub fn info_line(&self, path: &str) -> String {
        format!(
            "{} {}% used, {} available",
            path, self.used_percent, self.available
        )
    }
}
