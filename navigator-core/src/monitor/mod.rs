//! Host resource sampling and threshold classification.

mod collector;

pub use collector::{MetricSource, SysinfoSource};

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{MonitorConfig, ResourceThresholds};
use crate::models::{
    Bottleneck, BottleneckSeverity, HealthLevel, MetricSample, SystemHealthSummary,
};

pub struct SystemMonitor {
    source: Arc<dyn MetricSource>,
    thresholds: ResourceThresholds,
    stale_after: Duration,
    history_capacity: usize,
    latest: RwLock<Option<Arc<MetricSample>>>,
    history: Mutex<VecDeque<MetricSample>>,
    last_error: RwLock<Option<String>>,
}

impl SystemMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_source(Arc::new(SysinfoSource::new()), config)
    }

    pub fn with_source(source: Arc<dyn MetricSource>, config: &MonitorConfig) -> Self {
        Self {
            source,
            thresholds: config.thresholds.clone(),
            stale_after: Duration::from_secs(config.stale_after_secs),
            history_capacity: config.history_capacity.max(1),
            latest: RwLock::new(None),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity.max(1))),
            last_error: RwLock::new(None),
        }
    }

    /// Samples the host now.
    ///
    /// A failed read is logged and answered with the last good sample, or a
    /// zeroed one if there never was one. The failure shows up as `stale` in
    /// [`get_system_health_summary`](Self::get_system_health_summary).
    pub fn get_current_metrics(&self) -> MetricSample {
        match self.source.sample() {
            Ok(sample) => {
                self.record(sample.clone());
                *self.last_error.write() = None;
                sample
            }
            Err(e) => {
                warn!(
                    source = self.source.name(),
                    error_code = e.error_code(),
                    error = %e,
                    "Host sampling failed, serving last known sample"
                );
                *self.last_error.write() = Some(e.to_string());
                self.latest()
                    .map(|s| s.as_ref().clone())
                    .unwrap_or_else(MetricSample::zeroed)
            }
        }
    }

    /// Stores an externally produced sample as the latest reading.
    pub fn record(&self, sample: MetricSample) {
        {
            let mut history = self.history.lock();
            while history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(sample.clone());
        }

        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            disk = sample.disk_usage_percent,
            "Host sample recorded"
        );
        *self.latest.write() = Some(Arc::new(sample));
    }

    pub fn latest(&self) -> Option<Arc<MetricSample>> {
        self.latest.read().clone()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<MetricSample> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.thresholds
    }

    /// Classifies the latest sample. Does not sample the host.
    pub fn get_system_health_summary(&self) -> SystemHealthSummary {
        let collector_error = self.last_error();

        let Some(latest) = self.latest() else {
            return SystemHealthSummary {
                health_status: HealthLevel::Unknown,
                bottlenecks: Vec::new(),
                sample: MetricSample::zeroed(),
                stale: true,
                sample_age_seconds: 0.0,
                collector_error,
            };
        };

        let sample = latest.as_ref().clone();
        let age = sample.age_seconds();
        let stale = collector_error.is_some() || age > self.stale_after.as_secs_f64();
        let bottlenecks = detect_bottlenecks(&sample, &self.thresholds);

        let health_status = if stale {
            HealthLevel::Unknown
        } else if bottlenecks
            .iter()
            .any(|b| b.severity == BottleneckSeverity::Critical)
        {
            HealthLevel::Critical
        } else if bottlenecks.is_empty() {
            HealthLevel::Healthy
        } else {
            HealthLevel::Warning
        };

        SystemHealthSummary {
            health_status,
            bottlenecks,
            sample,
            stale,
            sample_age_seconds: age,
            collector_error,
        }
    }
}

/// Resources over their warning or critical threshold, most severe first.
pub fn detect_bottlenecks(
    sample: &MetricSample,
    thresholds: &ResourceThresholds,
) -> Vec<Bottleneck> {
    let checks = [
        ("cpu", sample.cpu_percent, thresholds.cpu_warning, thresholds.cpu_critical),
        (
            "memory",
            sample.memory_percent,
            thresholds.memory_warning,
            thresholds.memory_critical,
        ),
        (
            "disk",
            sample.disk_usage_percent,
            thresholds.disk_warning,
            thresholds.disk_critical,
        ),
    ];

    let mut found: Vec<Bottleneck> = checks
        .into_iter()
        .filter_map(|(resource, value, warning, critical)| {
            let (severity, threshold) = if value > critical {
                (BottleneckSeverity::Critical, critical)
            } else if value > warning {
                (BottleneckSeverity::Warning, warning)
            } else {
                return None;
            };

            Some(Bottleneck {
                resource: resource.to_string(),
                severity,
                value,
                threshold,
                message: format!(
                    "{} usage {:.1}% is above the {} threshold of {:.1}%",
                    resource, value, severity_label(severity), threshold
                ),
            })
        })
        .collect();

    found.sort_by(|a, b| b.severity.cmp(&a.severity));
    found
}

fn severity_label(severity: BottleneckSeverity) -> &'static str {
    match severity {
        BottleneckSeverity::Warning => "warning",
        BottleneckSeverity::Critical => "critical",
    }
}
