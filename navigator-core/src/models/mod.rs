mod execution;
mod health;
mod metric_sample;
mod trend;

pub use execution::{AgentMetrics, ExecutionOutcome, ExecutionRecord, ExecutionStatus};
pub use health::{
    Bottleneck, BottleneckSeverity, HealthLevel, HealthReport, MonitoringSummary,
    SystemHealthSummary,
};
pub use metric_sample::{
    MetricSample, CPU_PERCENT, DISK_USAGE_PERCENT, MEMORY_PERCENT, PROCESS_COUNT,
};
pub use trend::{AlertSeverity, MaintenanceAlert, Trend, TrendDirection};
