//! Weighted health score over host and agent signals.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;

use crate::models::{AgentMetrics, BottleneckSeverity, HealthLevel, HealthReport, SystemHealthSummary};

pub const SYSTEM_WEIGHT: f64 = 0.6;
pub const AGENT_WEIGHT: f64 = 0.4;

pub const CRITICAL_BOTTLENECK_PENALTY: f64 = 30.0;
pub const WARNING_BOTTLENECK_PENALTY: f64 = 15.0;
/// Score given to the host side when the latest sample is stale or missing.
pub const UNMEASURED_SYSTEM_SCORE: f64 = 50.0;
pub const LONG_RUNNING_PENALTY: f64 = 5.0;
pub const MAX_LONG_RUNNING_PENALTY: f64 = 20.0;

pub const HEALTHY_SCORE: f64 = 80.0;
pub const DEGRADED_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthAggregator;

impl HealthAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        system: &SystemHealthSummary,
        agents: &BTreeMap<String, AgentMetrics>,
        long_running_executions: usize,
    ) -> HealthReport {
        let system_score = system_score(system);

        let completed: u64 = agents.values().map(|m| m.completed_executions).sum();
        let failed: u64 = agents.values().map(|m| m.failed_executions).sum();
        let running: u64 = agents.values().map(|m| m.running_executions).sum();
        let closed = completed + failed;
        let success_rate = (closed > 0).then(|| completed as f64 / closed as f64);

        let long_running_penalty =
            (long_running_executions as f64 * LONG_RUNNING_PENALTY).min(MAX_LONG_RUNNING_PENALTY);
        let agent_score =
            (success_rate.map_or(100.0, |rate| rate * 100.0) - long_running_penalty).clamp(0.0, 100.0);

        let score = (SYSTEM_WEIGHT * system_score + AGENT_WEIGHT * agent_score).clamp(0.0, 100.0);
        let has_critical_bottleneck = !system.stale
            && system
                .bottlenecks
                .iter()
                .any(|b| b.severity == BottleneckSeverity::Critical);

        let mut status = if score >= HEALTHY_SCORE {
            HealthLevel::Healthy
        } else if score >= DEGRADED_SCORE {
            HealthLevel::Degraded
        } else {
            HealthLevel::Critical
        };
        if status == HealthLevel::Healthy && (system.stale || has_critical_bottleneck) {
            status = HealthLevel::Degraded;
        }

        let mut issues = Vec::new();
        if system.stale {
            issues.push("system metrics unavailable".to_string());
        } else {
            issues.extend(system.bottlenecks.iter().map(|b| b.message.clone()));
        }
        if let Some(rate) = success_rate {
            if rate < 1.0 {
                issues.push(format!("agent success rate {:.1}%", rate * 100.0));
            }
        }
        if long_running_executions > 0 {
            issues.push(format!(
                "{} long-running execution(s)",
                long_running_executions
            ));
        }

        let message = if issues.is_empty() {
            "All systems operating normally".to_string()
        } else {
            format!("{}: {}", capitalize(&status.to_string()), issues.join("; "))
        };

        HealthReport {
            status,
            score,
            message,
            details: json!({
                "system_score": system_score,
                "agent_score": agent_score,
                "system_status": system.health_status,
                "system_stale": system.stale,
                "collector_error": system.collector_error,
                "bottlenecks": system.bottlenecks.len(),
                "cpu_percent": system.sample.cpu_percent,
                "memory_percent": system.sample.memory_percent,
                "disk_usage_percent": system.sample.disk_usage_percent,
                "agents": agents.len(),
                "completed_executions": completed,
                "failed_executions": failed,
                "running_executions": running,
                "long_running_executions": long_running_executions,
                "success_rate": success_rate,
                "agent_data_available": success_rate.is_some(),
                "weights": { "system": SYSTEM_WEIGHT, "agents": AGENT_WEIGHT },
            }),
            timestamp: Utc::now(),
        }
    }
}

fn system_score(system: &SystemHealthSummary) -> f64 {
    if system.stale {
        return UNMEASURED_SYSTEM_SCORE;
    }

    let penalty: f64 = system
        .bottlenecks
        .iter()
        .map(|b| match b.severity {
            BottleneckSeverity::Critical => CRITICAL_BOTTLENECK_PENALTY,
            BottleneckSeverity::Warning => WARNING_BOTTLENECK_PENALTY,
        })
        .sum();
    (100.0 - penalty).max(0.0)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
