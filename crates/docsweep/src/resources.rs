//! Host resource detection and the sizing rules derived from it.

use std::sync::Mutex;

use sysinfo::System;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Memory budgeted per worker process when sizing the pool.
pub const DEFAULT_WORKER_MEMORY_BUDGET: u64 = GIB;

/// CPU and memory figures of the machine, captured once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    pub logical_cpus: usize,
    /// Bytes.
    pub total_memory: u64,
    /// Bytes.
    pub available_memory: u64,
}

impl HostResources {
    pub fn new(logical_cpus: usize, total_memory: u64, available_memory: u64) -> Self {
        Self {
            logical_cpus: logical_cpus.max(1),
            total_memory,
            available_memory,
        }
    }

    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let host = Self::new(
            num_cpus::get(),
            system.total_memory(),
            system.available_memory(),
        );
        log::debug!(
            "Detected {} logical CPUs, {:.1} GiB of {:.1} GiB memory available",
            host.logical_cpus,
            host.available_memory as f64 / GIB as f64,
            host.total_memory as f64 / GIB as f64
        );
        host
    }

    /// How many `budget`-sized slices fit in available memory, at least one.
    pub fn memory_slots(&self, budget: u64) -> usize {
        let budget = budget.max(1);
        ((self.available_memory / budget) as usize).max(1)
    }
}

/// Default worker count for a host.
///
/// The CPU figure is tiered: small hosts keep one core for the orchestrator,
/// mid-size hosts use 90% of cores, very large hosts use at least 32. The
/// result never exceeds what available memory allows at `per_worker_budget`
/// bytes per worker, and is at least 1.
pub fn recommended_workers(host: &HostResources, per_worker_budget: u64) -> usize {
    let cores = host.logical_cpus.max(1);
    let by_cpu = if cores <= 4 {
        cores.saturating_sub(1).max(1)
    } else if cores <= 32 {
        cores * 9 / 10
    } else {
        (cores * 9 / 10).max(32)
    };
    by_cpu.min(host.memory_slots(per_worker_budget)).max(1)
}

/// Reports current memory usage. The orchestrator consults it to shrink
/// batches under pressure.
pub trait MemoryMonitor: Send + Sync {
    /// Used memory as a percentage of total, 0 to 100.
    fn usage_percent(&self) -> f64;
}

pub struct SystemMemoryMonitor {
    system: Mutex<System>,
}

impl SystemMemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn usage_percent(&self) -> f64 {
        let Ok(mut system) = self.system.lock() else {
            return 0.0;
        };
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(system.available_memory());
        used as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cpus: usize, available_gib: u64) -> HostResources {
        HostResources::new(cpus, 512 * GIB, available_gib * GIB)
    }

    #[test]
    fn test_small_hosts_keep_a_core_free() {
        assert_eq!(recommended_workers(&host(1, 64), GIB), 1);
        assert_eq!(recommended_workers(&host(2, 64), GIB), 1);
        assert_eq!(recommended_workers(&host(4, 64), GIB), 3);
    }

    #[test]
    fn test_mid_hosts_use_ninety_percent() {
        assert_eq!(recommended_workers(&host(8, 64), GIB), 7);
        assert_eq!(recommended_workers(&host(20, 64), GIB), 18);
        assert_eq!(recommended_workers(&host(32, 64), GIB), 28);
    }

    #[test]
    fn test_large_hosts_have_a_floor() {
        assert_eq!(recommended_workers(&host(33, 256), GIB), 32);
        assert_eq!(recommended_workers(&host(96, 256), GIB), 86);
    }

    #[test]
    fn test_memory_cap_wins() {
        assert_eq!(recommended_workers(&host(64, 6), GIB), 6);
        assert_eq!(recommended_workers(&host(16, 2), GIB), 2);
        assert_eq!(recommended_workers(&host(16, 8), 4 * GIB), 2);
    }

    #[test]
    fn test_never_zero() {
        let starved = HostResources::new(8, GIB, 100);
        assert_eq!(recommended_workers(&starved, GIB), 1);
        assert_eq!(HostResources::new(0, 0, 0).logical_cpus, 1);
    }

    #[test]
    fn test_monotone_in_cores_for_fixed_memory() {
        for available in [1, 4, 16, 40, 512] {
            let mut previous = 0;
            for cpus in 1..=256 {
                let workers = recommended_workers(&host(cpus, available), GIB);
                assert!(
                    workers >= previous,
                    "{} cores gave {} < {}",
                    cpus,
                    workers,
                    previous
                );
                assert!(workers as u64 <= available.max(1));
                previous = workers;
            }
        }
    }

    #[test]
    fn test_system_monitor_reports_a_percentage() {
        let usage = SystemMemoryMonitor::new().usage_percent();
        assert!((0.0..=100.0).contains(&usage));
    }
}
