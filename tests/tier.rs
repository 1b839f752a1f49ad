use stackwright::probe::ResourceSnapshot;
use stackwright::tier::{PerformanceTier, TierPolicy, select_tier};

fn host(cpu: u32, total_mb: u64) -> ResourceSnapshot {
    ResourceSnapshot::new(cpu, total_mb, total_mb * 3 / 4, 100)
}

#[test]
fn bands_are_monotonic_and_total() {
    let policy = TierPolicy::default();
    let mut previous = policy.tier_for(0);
    assert_eq!(previous, PerformanceTier::Minimal);

    for mb in (0..=32_768).step_by(7) {
        let tier = policy.tier_for(mb);
        assert!(tier >= previous, "{mb} MB went from {previous} to {tier}");
        previous = tier;
    }
    assert_eq!(previous, PerformanceTier::HighPerformance);
}

#[test]
fn band_bounds_are_inclusive_and_contiguous() {
    let policy = TierPolicy::default();
    let cases = [
        (1024, PerformanceTier::Minimal),
        (1025, PerformanceTier::Basic),
        (2048, PerformanceTier::Basic),
        (2049, PerformanceTier::Standard),
        (4096, PerformanceTier::Standard),
        (4097, PerformanceTier::Enhanced),
        (8192, PerformanceTier::Enhanced),
        (8193, PerformanceTier::HighPerformance),
    ];
    for (mb, expected) in cases {
        assert_eq!(policy.tier_for(mb), expected, "{mb} MB");
    }
}

#[test]
fn small_dual_core_host_is_basic() {
    let (tier, profile) = select_tier(&host(2, 2048));

    assert_eq!(tier, PerformanceTier::Basic);
    assert_eq!(profile.tier, tier);
    assert_eq!(profile.db_max_connections, 50);
    assert_eq!(profile.worker_process_count, 2);
}

#[test]
fn large_host_caps_workers() {
    let (tier, profile) = select_tier(&host(16, 16_384));

    assert_eq!(tier, PerformanceTier::HighPerformance);
    assert_eq!(profile.worker_process_count, 8);
    assert_eq!(profile.db_max_connections, 400);
}

#[test]
fn memory_shares_respect_ceilings() {
    // 60% of 1536 MB is 921 MB, above the Basic ceiling of 768 MB.
    let (_, profile) = select_tier(&ResourceSnapshot::new(2, 2048, 1536, 40));
    assert_eq!(profile.cache_memory_mb, 768);
    assert_eq!(profile.runtime_memory_mb, 256);
    assert_eq!(profile.tmp_table_size_mb, 48);
}

#[test]
fn high_performance_shares_are_uncapped() {
    let (_, profile) = select_tier(&ResourceSnapshot::new(16, 32_768, 30_000, 400));
    assert_eq!(profile.cache_memory_mb, 18_000);
    assert_eq!(profile.runtime_memory_mb, 7_500);
    assert_eq!(profile.tmp_table_size_mb, 256);
}

#[test]
fn starved_host_gets_floor_allocations() {
    let (_, profile) = select_tier(&ResourceSnapshot::new(1, 1024, 20, 10));
    assert_eq!(profile.cache_memory_mb, 64);
    assert_eq!(profile.runtime_memory_mb, 64);
    assert_eq!(profile.tmp_table_size_mb, 16);
}

#[test]
fn zero_cores_still_gets_one_worker() {
    let (_, profile) = select_tier(&host(0, 4096));
    assert_eq!(profile.worker_process_count, 1);
}

#[test]
fn zero_worker_cap_still_selects_one_worker() {
    let policy = TierPolicy {
        max_worker_processes: 0,
        ..TierPolicy::default()
    };
    assert!(policy.validate().is_err());

    let (_, profile) = policy.select(&host(4, 4096));
    assert_eq!(profile.worker_process_count, 1);
}

#[test]
fn pool_sizes_are_ordered_in_every_tier() {
    for tier in PerformanceTier::ALL {
        let l = tier.limits();
        assert!(l.worker_min_idle <= l.worker_start_count, "{tier}");
        assert!(l.worker_start_count <= l.worker_max_idle, "{tier}");
        assert!(l.worker_max_idle <= l.worker_max_children, "{tier}");
    }
}

#[test]
fn limits_grow_with_tier() {
    for pair in PerformanceTier::ALL.windows(2) {
        let (lower, upper) = (pair[0].limits(), pair[1].limits());
        assert!(lower.db_max_connections < upper.db_max_connections);
        assert!(lower.worker_max_children < upper.worker_max_children);
        assert!(lower.max_upload_size_bytes < upper.max_upload_size_bytes);
    }
}

#[test]
fn custom_policy_moves_bands() {
    let policy = TierPolicy {
        band_upper_bounds_mb: [512, 1024, 2048, 4096],
        ..TierPolicy::default()
    };
    policy.validate().unwrap();

    assert_eq!(policy.tier_for(2048), PerformanceTier::Standard);
    assert_eq!(policy.tier_for(5000), PerformanceTier::HighPerformance);
}

#[test]
fn unordered_bounds_rejected() {
    let policy = TierPolicy {
        band_upper_bounds_mb: [2048, 1024, 4096, 8192],
        ..TierPolicy::default()
    };
    assert!(policy.validate().is_err());
}
