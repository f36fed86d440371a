use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CPU_PERCENT: &str = "cpu_percent";
pub const MEMORY_PERCENT: &str = "memory_percent";
pub const DISK_USAGE_PERCENT: &str = "disk_usage_percent";
pub const PROCESS_COUNT: &str = "process_count";

/// Point-in-time host resource reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub disk_usage_percent: f64,
    pub disk_free_bytes: u64,
    pub process_count: u64,
}

impl MetricSample {
    pub fn new(
        cpu_percent: f64,
        memory_percent: f64,
        memory_used_bytes: u64,
        disk_usage_percent: f64,
        disk_free_bytes: u64,
        process_count: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: clamp_percent(cpu_percent),
            memory_percent: clamp_percent(memory_percent),
            memory_used_bytes,
            disk_usage_percent: clamp_percent(disk_usage_percent),
            disk_free_bytes,
            process_count,
        }
    }

    /// All-zero sample used before the first successful read.
    pub fn zeroed() -> Self {
        Self::new(0.0, 0.0, 0, 0.0, 0, 0)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn age_seconds(&self) -> f64 {
        (Utc::now() - self.timestamp).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn memory_used_mb(&self) -> f64 {
        self.memory_used_bytes as f64 / 1024.0 / 1024.0
    }

    pub fn disk_free_gb(&self) -> f64 {
        self.disk_free_bytes as f64 / 1024.0 / 1024.0 / 1024.0
    }

    /// The values tracked by the trend engine, keyed by metric name.
    pub fn trend_point(&self) -> HashMap<String, f64> {
        HashMap::from([
            (CPU_PERCENT.to_string(), self.cpu_percent),
            (MEMORY_PERCENT.to_string(), self.memory_percent),
            (DISK_USAGE_PERCENT.to_string(), self.disk_usage_percent),
            (PROCESS_COUNT.to_string(), self.process_count as f64),
        ])
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
