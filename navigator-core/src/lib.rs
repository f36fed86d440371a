#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::derivable_impls,
    clippy::type_complexity,
    clippy::unnecessary_map_or
)]

pub mod agent;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod health;
pub mod http;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod tracker;
pub mod trends;

pub use agent::{
    DiagnosisStatus, MonitoringAgent, MonitoringContext, MonitoringExport, EXECUTIONS_TOTAL,
    EXECUTION_SECONDS_TOTAL, HEALTH_SCORE, RUNNING_EXECUTIONS,
};
pub use config::{
    get_config_dir, ConfigLoadError, DiagnosisConfig, ExporterConfig, LoggingConfig,
    MetricThreshold, MonitorConfig, NavigatorConfig, ResourceThresholds, TrackerConfig,
    TrendConfig,
};
pub use diagnosis::{
    fallback_diagnosis, Diagnosis, DiagnosisCapability, DiagnosisClient, DiagnosisPayload,
    DiagnosisSeverity, GeminiDiagnosisClient,
};
pub use error::{
    retry_async_with_config, ErrorKind, NavigatorError, NavigatorResult, RetryConfig,
};
pub use health::HealthAggregator;
pub use models::{
    AgentMetrics, AlertSeverity, Bottleneck, BottleneckSeverity, ExecutionOutcome,
    ExecutionRecord, ExecutionStatus, HealthLevel, HealthReport, MaintenanceAlert, MetricSample,
    MonitoringSummary, SystemHealthSummary, Trend, TrendDirection,
};
pub use monitor::{MetricSource, SysinfoSource, SystemMonitor};
pub use registry::{Labels, MetricKind, MetricsRegistry, MetricsSummary};
pub use tracker::AgentExecutionTracker;
pub use trends::{linear_regression, LinearFit, TrendEngine};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
