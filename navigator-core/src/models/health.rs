use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{AgentMetrics, MaintenanceAlert, MetricSample, Trend};
use crate::registry::MetricsSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Degraded,
    Critical,
    /// The input could not be measured (stale or missing sample).
    Unknown,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "healthy"),
            HealthLevel::Warning => write!(f, "warning"),
            HealthLevel::Degraded => write!(f, "degraded"),
            HealthLevel::Critical => write!(f, "critical"),
            HealthLevel::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckSeverity {
    Warning,
    Critical,
}

/// A resource dimension over its configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub resource: String,
    pub severity: BottleneckSeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Threshold classification of the latest host sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthSummary {
    pub health_status: HealthLevel,
    pub bottlenecks: Vec<Bottleneck>,
    pub sample: MetricSample,
    /// True when the sample is older than the staleness limit or was never read.
    pub stale: bool,
    pub sample_age_seconds: f64,
    pub collector_error: Option<String>,
}

/// Weighted health score across host and agent signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    /// 0-100
    pub score: f64,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Read-only composed view across every monitoring component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub timestamp: DateTime<Utc>,
    pub health: HealthReport,
    pub system: SystemHealthSummary,
    pub agent_metrics: BTreeMap<String, AgentMetrics>,
    pub registry: MetricsSummary,
    pub trends: Vec<Trend>,
    pub alerts: Vec<MaintenanceAlert>,
    pub ai_diagnosis_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_level_display() {
        assert_eq!(HealthLevel::Healthy.to_string(), "healthy");
        assert_eq!(HealthLevel::Degraded.to_string(), "degraded");
        assert_eq!(HealthLevel::Unknown.to_string(), "unknown");
        assert_eq!(
            serde_json::to_string(&HealthLevel::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_bottleneck_severity_ordering() {
        assert!(BottleneckSeverity::Critical > BottleneckSeverity::Warning);
    }
}
