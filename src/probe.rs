//! Read-only inspection of host capacity.
//!
//! The probe captures a [`ResourceSnapshot`] once per run and checks it
//! against the minimum viable thresholds. Low memory is fatal; low disk
//! is reported as an advisory [`Warning`] and left to the caller to gate.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cmd;
use crate::error::{ProvisionError, ProvisionResult};

/// Hosts with less total memory than this are rejected.
pub const MIN_TOTAL_MEMORY_MB: u64 = 1024;

/// Free disk below this produces a [`Warning::LowDisk`].
pub const MIN_DISK_GB: u64 = 5;

/// Host capacity captured at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_cores: u32,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub available_disk_gb: u64,
}

impl ResourceSnapshot {
    #[must_use]
    pub const fn new(
        cpu_cores: u32,
        total_memory_mb: u64,
        available_memory_mb: u64,
        available_disk_gb: u64,
    ) -> Self {
        Self {
            cpu_cores,
            total_memory_mb,
            available_memory_mb,
            available_disk_gb,
        }
    }
}

/// Non-fatal findings the operator should confirm before continuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    LowDisk { available_gb: u64, minimum_gb: u64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowDisk {
                available_gb,
                minimum_gb,
            } => write!(
                f,
                "only {available_gb} GB of disk available \
                 ({minimum_gb} GB recommended)"
            ),
        }
    }
}

/// A validated snapshot plus any advisory warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub snapshot: ResourceSnapshot,
    pub warnings: Vec<Warning>,
}

/// Source of host resource figures.
pub trait ResourceProbe {
    /// Inspect the host. `target` is the directory artifacts will be
    /// written to; disk space is measured on its filesystem.
    fn snapshot(&self, target: &Path) -> ProvisionResult<ResourceSnapshot>;
}

/// Probe for the local Linux host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl HostProbe {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ResourceProbe for HostProbe {
    fn snapshot(&self, target: &Path) -> ProvisionResult<ResourceSnapshot> {
        let cpu_cores = std::thread::available_parallelism()
            .map_or(1, |n| u32::try_from(n.get()).unwrap_or(u32::MAX));

        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .map_err(|e| ProvisionError::Probe(format!("cannot read /proc/meminfo: {e}")))?;
        let (total_memory_mb, available_memory_mb) = parse_meminfo(&meminfo)
            .ok_or_else(|| ProvisionError::Probe("MemTotal missing from /proc/meminfo".into()))?;

        // The target may not exist yet; measure the closest ancestor that does.
        let existing = target
            .ancestors()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
            .unwrap_or_else(|| Path::new("/"));
        let existing = existing.to_string_lossy();
        let df = cmd::run("df", &["-Pk", &existing])?;
        let available_kb = parse_df_available_kb(&df)
            .ok_or_else(|| ProvisionError::Probe(format!("unexpected df output: {df}")))?;

        let snapshot = ResourceSnapshot {
            cpu_cores,
            total_memory_mb,
            available_memory_mb,
            available_disk_gb: available_kb / (1024 * 1024),
        };
        debug!(?snapshot, "host probed");
        Ok(snapshot)
    }
}

/// Capture a snapshot from `source` and check it against the minimums.
pub fn probe(source: &dyn ResourceProbe, target: &Path) -> ProvisionResult<ProbeReport> {
    assess(source.snapshot(target)?)
}

/// Check a snapshot against the minimums.
///
/// Returns [`ProvisionError::InsufficientResources`] when total memory is
/// below [`MIN_TOTAL_MEMORY_MB`]; disk shortfalls only add a warning.
pub fn assess(snapshot: ResourceSnapshot) -> ProvisionResult<ProbeReport> {
    if snapshot.total_memory_mb < MIN_TOTAL_MEMORY_MB {
        return Err(ProvisionError::InsufficientResources {
            total_memory_mb: snapshot.total_memory_mb,
            required_mb: MIN_TOTAL_MEMORY_MB,
        });
    }

    let mut warnings = Vec::new();
    if snapshot.available_disk_gb < MIN_DISK_GB {
        warnings.push(Warning::LowDisk {
            available_gb: snapshot.available_disk_gb,
            minimum_gb: MIN_DISK_GB,
        });
    }

    Ok(ProbeReport { snapshot, warnings })
}

/// Parse `/proc/meminfo` into `(total_mb, available_mb)`.
///
/// Kernels without `MemAvailable` fall back to `MemFree`.
#[must_use]
pub fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let field = |name: &str| {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };

    let total_kb = field("MemTotal")?;
    let available_kb = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .unwrap_or(total_kb);

    Some((total_kb / 1024, available_kb / 1024))
}

/// Extract the `Available` column (KiB) from `df -Pk` output.
#[must_use]
pub fn parse_df_available_kb(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    line.split_whitespace().nth(3)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "\
MemTotal:        2048000 kB
MemFree:          512000 kB
MemAvailable:    1536000 kB
Buffers:           10240 kB
";

    #[test]
    fn meminfo_total_and_available() {
        assert_eq!(parse_meminfo(MEMINFO), Some((2000, 1500)));
    }

    #[test]
    fn meminfo_falls_back_to_free() {
        let content = "MemTotal: 4096000 kB\nMemFree: 1024000 kB\n";
        assert_eq!(parse_meminfo(content), Some((4000, 1000)));
    }

    #[test]
    fn meminfo_without_total() {
        assert_eq!(parse_meminfo("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn df_available_column() {
        let out = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/sda1        102400000 40000000  62400000      40% /
";
        assert_eq!(parse_df_available_kb(out), Some(62_400_000));
    }

    #[test]
    fn df_garbage() {
        assert_eq!(parse_df_available_kb("nope"), None);
    }

    #[test]
    fn host_probe_reports_positive_values() {
        let snapshot = HostProbe::new()
            .snapshot(Path::new("."))
            .expect("probe local host");
        assert!(snapshot.cpu_cores > 0);
        assert!(snapshot.total_memory_mb > 0);
    }
}
