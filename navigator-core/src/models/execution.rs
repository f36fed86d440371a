use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::NavigatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    /// Lowercase form used as a metric label value.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Completed => write!(f, "COMPLETED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = NavigatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            _ => Err(NavigatorError::UnknownStatus(s.to_string())),
        }
    }
}

/// Optional data supplied when an execution finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub error_message: Option<String>,
    pub memory_peak_mb: Option<f64>,
    pub cpu_avg_percent: Option<f64>,
    pub result_size_bytes: Option<u64>,
}

impl ExecutionOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_memory_peak_mb(mut self, mb: f64) -> Self {
        self.memory_peak_mb = Some(mb);
        self
    }

    pub fn with_cpu_avg_percent(mut self, percent: f64) -> Self {
        self.cpu_avg_percent = Some(percent);
        self
    }

    pub fn with_result_size_bytes(mut self, bytes: u64) -> Self {
        self.result_size_bytes = Some(bytes);
        self
    }
}

/// One tracked unit of agent work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_key: String,
    pub agent_id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub memory_peak_mb: Option<f64>,
    pub cpu_avg_percent: Option<f64>,
    pub result_size_bytes: Option<u64>,
}

impl ExecutionRecord {
    pub fn new(execution_key: String, agent_id: String, task_id: String) -> Self {
        Self {
            execution_key,
            agent_id,
            task_id,
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            error_message: None,
            memory_peak_mb: None,
            cpu_avg_percent: None,
            result_size_bytes: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Applies the terminal transition. Callers guarantee the record is
    /// running and `status` is terminal.
    pub(crate) fn finish(
        &mut self,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
        at: DateTime<Utc>,
    ) {
        debug_assert!(self.is_running() && status.is_terminal());

        // error_message is present iff FAILED
        self.error_message = match status {
            ExecutionStatus::Failed => Some(
                outcome
                    .error_message
                    .unwrap_or_else(|| "execution failed".to_string()),
            ),
            _ => None,
        };
        self.memory_peak_mb = outcome.memory_peak_mb;
        self.cpu_avg_percent = outcome.cpu_avg_percent;
        self.result_size_bytes = outcome.result_size_bytes;
        self.end_time = Some(at.max(self.start_time));
        self.status = status;
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1e6)
    }

    /// Wall time since start for running records, total duration otherwise.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.duration_seconds().unwrap_or_else(|| {
            (now - self.start_time).num_microseconds().unwrap_or(0).max(0) as f64 / 1e6
        })
    }
}

/// Per-agent statistics derived from execution records on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent_id: String,
    pub total_executions: u64,
    pub running_executions: u64,
    pub completed_executions: u64,
    pub failed_executions: u64,
    /// completed / (completed + failed); `None` until a record closes.
    pub success_rate: Option<f64>,
    pub avg_duration_seconds: Option<f64>,
    pub min_duration_seconds: Option<f64>,
    pub max_duration_seconds: Option<f64>,
    pub peak_memory_mb: Option<f64>,
    pub avg_cpu_percent: Option<f64>,
    pub total_result_bytes: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    pub fn empty(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            total_executions: 0,
            running_executions: 0,
            completed_executions: 0,
            failed_executions: 0,
            success_rate: None,
            avg_duration_seconds: None,
            min_duration_seconds: None,
            max_duration_seconds: None,
            peak_memory_mb: None,
            avg_cpu_percent: None,
            total_result_bytes: 0,
            last_execution_at: None,
        }
    }

    pub fn from_records<'a>(
        agent_id: impl Into<String>,
        records: impl IntoIterator<Item = &'a ExecutionRecord>,
    ) -> Self {
        let mut metrics = Self::empty(agent_id);
        let mut duration_sum = 0.0;
        let mut cpu_sum = 0.0;
        let mut cpu_samples = 0u64;

        for record in records {
            metrics.total_executions += 1;
            metrics.last_execution_at = Some(match metrics.last_execution_at {
                Some(last) => last.max(record.start_time),
                None => record.start_time,
            });

            match record.status {
                ExecutionStatus::Running => {
                    metrics.running_executions += 1;
                    continue;
                }
                ExecutionStatus::Completed => metrics.completed_executions += 1,
                ExecutionStatus::Failed => metrics.failed_executions += 1,
            }

            if let Some(duration) = record.duration_seconds() {
                duration_sum += duration;
                metrics.min_duration_seconds = Some(
                    metrics
                        .min_duration_seconds
                        .map_or(duration, |min| min.min(duration)),
                );
                metrics.max_duration_seconds = Some(
                    metrics
                        .max_duration_seconds
                        .map_or(duration, |max| max.max(duration)),
                );
            }
            if let Some(mem) = record.memory_peak_mb {
                metrics.peak_memory_mb =
                    Some(metrics.peak_memory_mb.map_or(mem, |peak| peak.max(mem)));
            }
            if let Some(cpu) = record.cpu_avg_percent {
                cpu_sum += cpu;
                cpu_samples += 1;
            }
            metrics.total_result_bytes += record.result_size_bytes.unwrap_or(0);
        }

        let closed = metrics.closed_executions();
        if closed > 0 {
            metrics.success_rate = Some(metrics.completed_executions as f64 / closed as f64);
            metrics.avg_duration_seconds = Some(duration_sum / closed as f64);
        }
        if cpu_samples > 0 {
            metrics.avg_cpu_percent = Some(cpu_sum / cpu_samples as f64);
        }

        metrics
    }

    pub fn closed_executions(&self) -> u64 {
        self.completed_executions + self.failed_executions
    }

    /// Success rate as a percentage, 0.0 when nothing has closed yet.
    pub fn success_percent(&self) -> f64 {
        self.success_rate.map(|r| r * 100.0).unwrap_or(0.0)
    }
}
