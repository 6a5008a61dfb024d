//! Thread-count rules for recognition.

use crate::config::RecognitionConfig;
use crate::resources::HostResources;

const MIB: u64 = 1024 * 1024;

/// Threads a single worker may use for recognition on this host: the CPU
/// cap (all cores up to 4, one spare up to 16, 75% beyond) limited by how
/// many `per_thread_budget` slices fit in available memory. At least 1.
pub fn baseline_threads(host: &HostResources, per_thread_budget: u64) -> usize {
    let cores = host.logical_cpus.max(1);
    let by_cpu = if cores <= 4 {
        cores
    } else if cores <= 16 {
        cores - 1
    } else {
        cores * 3 / 4
    };
    by_cpu.min(host.memory_slots(per_thread_budget)).max(1)
}

/// Adjusts the baseline for one item.
///
/// Items above the large-item threshold get `baseline / ceil(size /
/// threshold)` threads. Items with many units get at least
/// `min(4, max(baseline, 2))`, bounded by the baseline itself so the
/// memory cap still holds. Never more threads than units.
pub fn adjust_for_item(
    baseline: usize,
    item_bytes: u64,
    unit_count: usize,
    config: &RecognitionConfig,
) -> usize {
    let baseline = baseline.max(1);
    let mut threads = baseline;

    let threshold = config.large_item_threshold_mb.max(1) * MIB;
    if item_bytes > threshold {
        let factor = item_bytes.div_ceil(threshold) as usize;
        threads = (baseline / factor).max(1);
    }

    if unit_count >= config.many_units_threshold {
        let floor = 4.min(baseline.max(2)).min(baseline);
        threads = threads.max(floor);
    }

    threads.min(unit_count.max(1))
}
