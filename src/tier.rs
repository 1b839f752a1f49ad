//! Mapping from host resources to a capacity tier.
//!
//! # Tier bands (default policy)
//!
//! | Total memory   | Tier            |
//! |----------------|-----------------|
//! | <= 1 GB        | Minimal         |
//! | <= 2 GB        | Basic           |
//! | <= 4 GB        | Standard        |
//! | <= 8 GB        | Enhanced        |
//! | > 8 GB         | HighPerformance |
//!
//! Bands are inclusive on the upper bound and contiguous, so every
//! memory value maps to exactly one tier. Memory allocations are derived
//! from *available* memory by a fixed percentage and then clamped to the
//! tier's ceiling.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};
use crate::probe::ResourceSnapshot;

const MIB: u64 = 1024 * 1024;

/// Smallest cache or runtime allocation ever emitted.
const MIN_ALLOCATION_MB: u64 = 64;

/// Discrete capacity tier, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceTier {
    Minimal,
    Basic,
    Standard,
    Enhanced,
    HighPerformance,
}

impl PerformanceTier {
    pub const ALL: [Self; 5] = [
        Self::Minimal,
        Self::Basic,
        Self::Standard,
        Self::Enhanced,
        Self::HighPerformance,
    ];

    /// Ordinal rank, 0 for `Minimal` through 4 for `HighPerformance`.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Enhanced => "enhanced",
            Self::HighPerformance => "high-performance",
        }
    }

    /// The static parameter bundle for this tier.
    #[must_use]
    pub const fn limits(self) -> TierLimits {
        match self {
            Self::Minimal => TierLimits {
                db_max_connections: 30,
                worker_connections: 512,
                worker_start_count: 2,
                worker_min_idle: 1,
                worker_max_idle: 3,
                worker_max_children: 5,
                cache_ceiling_mb: Some(256),
                runtime_ceiling_mb: Some(128),
                opcache_memory_mb: 64,
                max_upload_size_bytes: 16 * MIB,
            },
            Self::Basic => TierLimits {
                db_max_connections: 50,
                worker_connections: 1024,
                worker_start_count: 3,
                worker_min_idle: 2,
                worker_max_idle: 4,
                worker_max_children: 10,
                cache_ceiling_mb: Some(768),
                runtime_ceiling_mb: Some(256),
                opcache_memory_mb: 128,
                max_upload_size_bytes: 32 * MIB,
            },
            Self::Standard => TierLimits {
                db_max_connections: 100,
                worker_connections: 2048,
                worker_start_count: 5,
                worker_min_idle: 3,
                worker_max_idle: 8,
                worker_max_children: 20,
                cache_ceiling_mb: Some(2048),
                runtime_ceiling_mb: Some(512),
                opcache_memory_mb: 192,
                max_upload_size_bytes: 64 * MIB,
            },
            Self::Enhanced => TierLimits {
                db_max_connections: 200,
                worker_connections: 4096,
                worker_start_count: 8,
                worker_min_idle: 5,
                worker_max_idle: 12,
                worker_max_children: 40,
                cache_ceiling_mb: Some(5120),
                runtime_ceiling_mb: Some(1024),
                opcache_memory_mb: 256,
                max_upload_size_bytes: 128 * MIB,
            },
            Self::HighPerformance => TierLimits {
                db_max_connections: 400,
                worker_connections: 8192,
                worker_start_count: 12,
                worker_min_idle: 8,
                worker_max_idle: 20,
                worker_max_children: 80,
                cache_ceiling_mb: None,
                runtime_ceiling_mb: None,
                opcache_memory_mb: 512,
                max_upload_size_bytes: 256 * MIB,
            },
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed per-tier parameters, before host-specific resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub db_max_connections: u32,
    pub worker_connections: u32,
    pub worker_start_count: u32,
    pub worker_min_idle: u32,
    pub worker_max_idle: u32,
    pub worker_max_children: u32,
    /// Upper bound for the database buffer pool; `None` is unbounded.
    pub cache_ceiling_mb: Option<u64>,
    /// Upper bound for the runtime memory limit; `None` is unbounded.
    pub runtime_ceiling_mb: Option<u64>,
    pub opcache_memory_mb: u64,
    pub max_upload_size_bytes: u64,
}

/// Parameters resolved for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierProfile {
    pub tier: PerformanceTier,
    pub db_max_connections: u32,
    /// nginx `worker_processes`: one per core, capped.
    pub worker_process_count: u32,
    /// nginx `worker_connections`.
    pub worker_connections: u32,
    /// PHP-FPM `pm.start_servers`.
    pub worker_start_count: u32,
    /// PHP-FPM `pm.min_spare_servers`.
    pub worker_min_idle: u32,
    /// PHP-FPM `pm.max_spare_servers`.
    pub worker_max_idle: u32,
    /// PHP-FPM `pm.max_children`.
    pub worker_max_children: u32,
    /// InnoDB buffer pool size.
    pub cache_memory_mb: u64,
    /// PHP `memory_limit`.
    pub runtime_memory_mb: u64,
    pub opcache_memory_mb: u64,
    pub tmp_table_size_mb: u64,
    pub max_upload_size_bytes: u64,
}

/// Thresholds and percentages used to resolve a tier.
///
/// These are empirical defaults and can be overridden from the
/// `[policy]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    /// Inclusive upper memory bound (MB) of Minimal, Basic, Standard
    /// and Enhanced. Anything above the last bound is HighPerformance.
    pub band_upper_bounds_mb: [u64; 4],
    /// Share of available memory given to the database buffer pool.
    pub cache_percent: u64,
    /// Share of available memory given to the application runtime.
    pub runtime_percent: u64,
    /// Cap on nginx worker processes regardless of core count.
    pub max_worker_processes: u32,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            band_upper_bounds_mb: [1024, 2048, 4096, 8192],
            cache_percent: 60,
            runtime_percent: 25,
            max_worker_processes: 8,
        }
    }
}

impl TierPolicy {
    /// Reject policies that would break band contiguity or produce
    /// nonsensical allocations.
    pub fn validate(&self) -> ProvisionResult<()> {
        if !self.band_upper_bounds_mb.windows(2).all(|w| w[0] < w[1]) {
            return Err(ProvisionError::Config(
                "policy.band_upper_bounds_mb must be strictly increasing".into(),
            ));
        }
        for (name, pct) in [
            ("cache_percent", self.cache_percent),
            ("runtime_percent", self.runtime_percent),
        ] {
            if !(1..=100).contains(&pct) {
                return Err(ProvisionError::Config(format!(
                    "policy.{name} must be between 1 and 100, got {pct}"
                )));
            }
        }
        if self.max_worker_processes == 0 {
            return Err(ProvisionError::Config(
                "policy.max_worker_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The band `total_memory_mb` falls into.
    #[must_use]
    pub fn tier_for(&self, total_memory_mb: u64) -> PerformanceTier {
        self.band_upper_bounds_mb
            .iter()
            .zip(PerformanceTier::ALL)
            .find(|(bound, _)| total_memory_mb <= **bound)
            .map_or(PerformanceTier::HighPerformance, |(_, tier)| tier)
    }

    /// Select the tier for `snapshot` and resolve its profile.
    #[must_use]
    pub fn select(&self, snapshot: &ResourceSnapshot) -> (PerformanceTier, TierProfile) {
        let tier = self.tier_for(snapshot.total_memory_mb);
        let limits = tier.limits();

        let cache_memory_mb = share(
            snapshot.available_memory_mb,
            self.cache_percent,
            limits.cache_ceiling_mb,
        );
        let runtime_memory_mb = share(
            snapshot.available_memory_mb,
            self.runtime_percent,
            limits.runtime_ceiling_mb,
        );

        let profile = TierProfile {
            tier,
            db_max_connections: limits.db_max_connections,
            worker_process_count: snapshot.cpu_cores.min(self.max_worker_processes).max(1),
            worker_connections: limits.worker_connections,
            worker_start_count: limits.worker_start_count,
            worker_min_idle: limits.worker_min_idle,
            worker_max_idle: limits.worker_max_idle,
            worker_max_children: limits.worker_max_children,
            cache_memory_mb,
            runtime_memory_mb,
            opcache_memory_mb: limits.opcache_memory_mb,
            tmp_table_size_mb: (cache_memory_mb / 16).clamp(16, 256),
            max_upload_size_bytes: limits.max_upload_size_bytes,
        };

        (tier, profile)
    }
}

/// Select a tier with the default [`TierPolicy`].
#[must_use]
pub fn select_tier(snapshot: &ResourceSnapshot) -> (PerformanceTier, TierProfile) {
    TierPolicy::default().select(snapshot)
}

fn share(available_mb: u64, percent: u64, ceiling_mb: Option<u64>) -> u64 {
    let derived = (available_mb * percent / 100).max(MIN_ALLOCATION_MB);
    ceiling_mb.map_or(derived, |ceiling| derived.min(ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_applies_percentage() {
        assert_eq!(share(1000, 60, None), 600);
    }

    #[test]
    fn share_respects_ceiling() {
        assert_eq!(share(10_000, 60, Some(768)), 768);
    }

    #[test]
    fn share_has_floor() {
        assert_eq!(share(50, 25, Some(128)), MIN_ALLOCATION_MB);
    }

    #[test]
    fn rank_follows_declaration_order() {
        let ranks: Vec<u8> = PerformanceTier::ALL.iter().map(|t| t.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn default_policy_is_valid() {
        TierPolicy::default().validate().expect("default policy");
    }

    #[test]
    fn policy_rejects_unsorted_bounds() {
        let policy = TierPolicy {
            band_upper_bounds_mb: [1024, 4096, 2048, 8192],
            ..TierPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn policy_rejects_zero_percent() {
        let policy = TierPolicy {
            cache_percent: 0,
            ..TierPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
