use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::trace;

use crate::error::{NavigatorError, NavigatorResult};
use crate::models::MetricSample;

/// Anything that can produce a host resource reading.
pub trait MetricSource: Send + Sync {
    fn sample(&self) -> NavigatorResult<MetricSample>;

    fn name(&self) -> &str {
        "custom"
    }
}

/// Reads CPU, memory, disk and process figures through `sysinfo`.
pub struct SysinfoSource {
    system: Mutex<System>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );

        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SysinfoSource {
    fn sample(&self) -> NavigatorResult<MetricSample> {
        let (cpu_percent, used_memory, total_memory, process_count) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();
            system.refresh_processes(ProcessesToUpdate::All, true);

            (
                system.global_cpu_usage() as f64,
                system.used_memory(),
                system.total_memory(),
                system.processes().len() as u64,
            )
        };

        if total_memory == 0 {
            return Err(NavigatorError::CollectorUnavailable(
                "total memory reported as zero".to_string(),
            ));
        }

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_free) = disks.list().iter().fold((0u64, 0u64), |acc, disk| {
            (
                acc.0.saturating_add(disk.total_space()),
                acc.1.saturating_add(disk.available_space()),
            )
        });

        let memory_percent = used_memory as f64 / total_memory as f64 * 100.0;
        let disk_usage_percent = if disk_total > 0 {
            (disk_total - disk_free.min(disk_total)) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        trace!(
            cpu_percent = cpu_percent,
            memory_percent = memory_percent,
            disk_usage_percent = disk_usage_percent,
            process_count = process_count,
            "Host sample collected"
        );

        Ok(MetricSample::new(
            cpu_percent,
            memory_percent,
            used_memory,
            disk_usage_percent,
            disk_free,
            process_count,
        ))
    }

    fn name(&self) -> &str {
        "sysinfo"
    }
}
