//! The monitoring facade.
//!
//! [`MonitoringContext`] owns every component; there is no process-wide
//! state. [`MonitoringAgent`] wraps a context, emits registry metrics for the
//! events it sees and optionally runs the background sampling loop.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::NavigatorConfig;
use crate::diagnosis::{Diagnosis, DiagnosisCapability, DiagnosisPayload};
use crate::error::{NavigatorError, NavigatorResult};
use crate::health::HealthAggregator;
use crate::models::{
    AgentMetrics, ExecutionOutcome, ExecutionRecord, ExecutionStatus, HealthReport,
    MaintenanceAlert, MetricSample, MonitoringSummary, SystemHealthSummary, Trend,
};
use crate::monitor::{MetricSource, SystemMonitor};
use crate::registry::{write_atomically, Labels, MetricKind, MetricsRegistry, MetricsSummary};
use crate::tracker::AgentExecutionTracker;
use crate::trends::TrendEngine;

pub const EXECUTIONS_TOTAL: &str = "navigator_agent_executions_total";
pub const EXECUTION_SECONDS_TOTAL: &str = "navigator_agent_execution_seconds_total";
pub const RUNNING_EXECUTIONS: &str = "navigator_agent_running_executions";
pub const SYSTEM_CPU_PERCENT: &str = "navigator_system_cpu_percent";
pub const SYSTEM_MEMORY_PERCENT: &str = "navigator_system_memory_percent";
pub const SYSTEM_MEMORY_USED_BYTES: &str = "navigator_system_memory_used_bytes";
pub const SYSTEM_DISK_USAGE_PERCENT: &str = "navigator_system_disk_usage_percent";
pub const SYSTEM_DISK_FREE_BYTES: &str = "navigator_system_disk_free_bytes";
pub const SYSTEM_PROCESS_COUNT: &str = "navigator_system_process_count";
pub const HEALTH_SCORE: &str = "navigator_health_score";

/// Days of trend history considered by summaries and exports.
const SUMMARY_TREND_DAYS: u32 = 1;

/// Every monitoring component, constructed together and torn down together.
pub struct MonitoringContext {
    pub config: NavigatorConfig,
    pub monitor: SystemMonitor,
    pub tracker: AgentExecutionTracker,
    pub registry: MetricsRegistry,
    pub trends: TrendEngine,
    pub diagnosis: DiagnosisCapability,
}

impl MonitoringContext {
    /// Samples the host through sysinfo and picks the diagnosis capability from config.
    pub fn new(config: NavigatorConfig) -> Self {
        let monitor = SystemMonitor::new(&config.monitor);
        Self::assemble(config, monitor)
    }

    pub fn with_source(config: NavigatorConfig, source: Arc<dyn MetricSource>) -> Self {
        let monitor = SystemMonitor::with_source(source, &config.monitor);
        Self::assemble(config, monitor)
    }

    pub fn with_diagnosis(mut self, diagnosis: DiagnosisCapability) -> Self {
        self.diagnosis = diagnosis;
        self
    }

    fn assemble(config: NavigatorConfig, monitor: SystemMonitor) -> Self {
        Self {
            tracker: AgentExecutionTracker::new(),
            registry: MetricsRegistry::new(),
            trends: TrendEngine::new(config.trends.clone()),
            diagnosis: DiagnosisCapability::from_config(&config.diagnosis),
            monitor,
            config,
        }
    }
}

/// Whether an AI diagnosis could be requested, and if not, why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisStatus {
    pub available: bool,
    pub reason: Option<String>,
}

/// The document written by [`MonitoringAgent::export_monitoring_data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringExport {
    pub timestamp: DateTime<Utc>,
    pub system_metrics: MetricSample,
    pub system_health: SystemHealthSummary,
    pub agent_metrics: BTreeMap<String, AgentMetrics>,
    pub health: HealthReport,
    pub alerts: Vec<MaintenanceAlert>,
    pub trends: Vec<Trend>,
    pub registry: MetricsSummary,
    pub ai_diagnosis: DiagnosisStatus,
}

#[derive(Clone)]
pub struct MonitoringAgent {
    ctx: Arc<MonitoringContext>,
    health: HealthAggregator,
    running_by_agent: Arc<DashMap<String, u64>>,
    is_running: Arc<AtomicBool>,
    /// Stop signal of the current run; replaced on every `start`.
    shutdown: Arc<parking_lot::Mutex<Option<watch::Sender<bool>>>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl MonitoringAgent {
    pub fn new(ctx: MonitoringContext) -> Self {
        let agent = Self {
            ctx: Arc::new(ctx),
            health: HealthAggregator::new(),
            running_by_agent: Arc::new(DashMap::new()),
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(parking_lot::Mutex::new(None)),
            task_handle: Arc::new(RwLock::new(None)),
        };
        agent.describe_metrics();
        agent
    }

    pub fn from_config(config: NavigatorConfig) -> Self {
        Self::new(MonitoringContext::new(config))
    }

    pub fn context(&self) -> &MonitoringContext {
        &self.ctx
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.ctx.config
    }

    pub fn tracker(&self) -> &AgentExecutionTracker {
        &self.ctx.tracker
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.ctx.registry
    }

    pub fn monitor(&self) -> &SystemMonitor {
        &self.ctx.monitor
    }

    pub fn trends(&self) -> &TrendEngine {
        &self.ctx.trends
    }

    fn describe_metrics(&self) {
        let descriptions = [
            (EXECUTIONS_TOTAL, MetricKind::Counter, "Finished agent executions by status"),
            (EXECUTION_SECONDS_TOTAL, MetricKind::Counter, "Wall time spent in finished executions"),
            (RUNNING_EXECUTIONS, MetricKind::Gauge, "Executions currently running"),
            (SYSTEM_CPU_PERCENT, MetricKind::Gauge, "Host CPU usage"),
            (SYSTEM_MEMORY_PERCENT, MetricKind::Gauge, "Host memory usage"),
            (SYSTEM_MEMORY_USED_BYTES, MetricKind::Gauge, "Host memory in use"),
            (SYSTEM_DISK_USAGE_PERCENT, MetricKind::Gauge, "Disk usage across mounted disks"),
            (SYSTEM_DISK_FREE_BYTES, MetricKind::Gauge, "Free disk space across mounted disks"),
            (SYSTEM_PROCESS_COUNT, MetricKind::Gauge, "Running processes on the host"),
            (HEALTH_SCORE, MetricKind::Gauge, "Weighted health score from 0 to 100"),
        ];

        for (name, kind, help) in descriptions {
            if let Err(e) = self.ctx.registry.describe(name, kind, help) {
                e.log();
            }
        }
    }

    // ------------------------------------------------------------------
    // Execution tracking
    // ------------------------------------------------------------------

    pub fn start_execution(&self, agent_id: &str, task_id: &str) -> String {
        let key = self.ctx.tracker.start_execution(agent_id, task_id);
        self.adjust_running(agent_id, true);
        key
    }

    pub fn end_execution(
        &self,
        execution_key: &str,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
    ) -> NavigatorResult<ExecutionRecord> {
        let record = self.ctx.tracker.end_execution(execution_key, status, outcome)?;
        self.adjust_running(&record.agent_id, false);

        let registry = &self.ctx.registry;
        let emitted = registry
            .increment_counter(
                EXECUTIONS_TOTAL,
                1.0,
                Labels::from([
                    ("agent", record.agent_id.as_str()),
                    ("status", record.status.label()),
                ]),
            )
            .and_then(|_| {
                registry.increment_counter(
                    EXECUTION_SECONDS_TOTAL,
                    record.duration_seconds().unwrap_or_default(),
                    Labels::from([("agent", record.agent_id.as_str())]),
                )
            });
        if let Err(e) = emitted {
            warn!(agent_id = %record.agent_id, error = %e, "Failed to emit execution metrics");
        }

        Ok(record)
    }

    /// Runs `task` as one tracked execution, ending it FAILED when it returns `Err`.
    pub async fn track<F, T, E>(&self, agent_id: &str, task_id: &str, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let key = self.start_execution(agent_id, task_id);
        let result = task.await;

        let (status, outcome) = match &result {
            Ok(_) => (ExecutionStatus::Completed, ExecutionOutcome::new()),
            Err(e) => (
                ExecutionStatus::Failed,
                ExecutionOutcome::new().with_error(e.to_string()),
            ),
        };
        if let Err(e) = self.end_execution(&key, status, outcome) {
            e.log();
        }

        result
    }

    /// Keeps the running gauge of `agent_id` in step with the tracker.
    fn adjust_running(&self, agent_id: &str, started: bool) {
        let mut count = self.running_by_agent.entry(agent_id.to_string()).or_insert(0);
        *count = if started {
            count.saturating_add(1)
        } else {
            count.saturating_sub(1)
        };

        // set while the entry is held so concurrent updates land in order
        if let Err(e) = self.ctx.registry.set_gauge(
            RUNNING_EXECUTIONS,
            *count as f64,
            Labels::from([("agent", agent_id)]),
        ) {
            warn!(agent_id = %agent_id, error = %e, "Failed to update running gauge");
        }
    }

    // ------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------

    /// Samples the host once and feeds the registry and trend engine.
    ///
    /// A failed read still returns a sample (see
    /// [`SystemMonitor::get_current_metrics`]) but is kept out of the trend history.
    pub fn collect_once(&self) -> MetricSample {
        let sample = self.ctx.monitor.get_current_metrics();
        if self.ctx.monitor.last_error().is_none() {
            self.absorb_sample(&sample);
        }
        sample
    }

    /// Accepts a sample produced elsewhere as if it had been collected.
    pub fn record_sample(&self, sample: MetricSample) {
        self.ctx.monitor.record(sample.clone());
        self.absorb_sample(&sample);
    }

    fn absorb_sample(&self, sample: &MetricSample) {
        self.ctx
            .trends
            .add_metrics_data_at(sample.timestamp, &sample.trend_point());

        let gauges = [
            (SYSTEM_CPU_PERCENT, sample.cpu_percent),
            (SYSTEM_MEMORY_PERCENT, sample.memory_percent),
            (SYSTEM_MEMORY_USED_BYTES, sample.memory_used_bytes as f64),
            (SYSTEM_DISK_USAGE_PERCENT, sample.disk_usage_percent),
            (SYSTEM_DISK_FREE_BYTES, sample.disk_free_bytes as f64),
            (SYSTEM_PROCESS_COUNT, sample.process_count as f64),
        ];
        for (name, value) in gauges {
            if let Err(e) = self.ctx.registry.set_gauge(name, value, Labels::new()) {
                warn!(metric = name, error = %e, "Failed to update system gauge");
            }
        }
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    fn long_running_threshold(&self) -> Duration {
        Duration::from_secs(self.ctx.config.tracker.long_running_threshold_secs)
    }

    pub fn long_running_executions(&self) -> Vec<ExecutionRecord> {
        self.ctx
            .tracker
            .long_running_executions(self.long_running_threshold())
    }

    pub fn get_agent_metrics(&self) -> BTreeMap<String, AgentMetrics> {
        self.ctx.tracker.get_agent_metrics()
    }

    pub fn get_health_status(&self) -> HealthReport {
        let system = self.ctx.monitor.get_system_health_summary();
        let agents = self.ctx.tracker.get_agent_metrics();
        self.health
            .evaluate(&system, &agents, self.long_running_executions().len())
    }

    pub fn analyze_trends(&self) -> Vec<Trend> {
        self.ctx.trends.analyze_system_trends(SUMMARY_TREND_DAYS)
    }

    pub fn maintenance_alerts(&self) -> Vec<MaintenanceAlert> {
        self.ctx
            .trends
            .predict_maintenance_needs(self.ctx.config.trends.horizon_minutes)
    }

    pub fn diagnosis_status(&self) -> DiagnosisStatus {
        DiagnosisStatus {
            available: self.ctx.diagnosis.is_available(),
            reason: self.ctx.diagnosis.unavailable_reason().map(str::to_string),
        }
    }

    /// Composed read-only view; reading it changes no component state.
    pub fn get_monitoring_summary(&self) -> MonitoringSummary {
        let system = self.ctx.monitor.get_system_health_summary();
        let agent_metrics = self.ctx.tracker.get_agent_metrics();
        let health =
            self.health
                .evaluate(&system, &agent_metrics, self.long_running_executions().len());

        MonitoringSummary {
            timestamp: Utc::now(),
            health,
            system,
            agent_metrics,
            registry: self.ctx.registry.get_metrics_summary(),
            trends: self.analyze_trends(),
            alerts: self.maintenance_alerts(),
            ai_diagnosis_available: self.ctx.diagnosis.is_available(),
        }
    }

    pub fn diagnosis_payload(&self) -> DiagnosisPayload {
        let system = self.ctx.monitor.get_system_health_summary();
        DiagnosisPayload {
            timestamp: Utc::now(),
            system_metrics: system.sample,
            bottlenecks: system.bottlenecks,
            alerts: self.maintenance_alerts(),
            agent_performance: self.ctx.tracker.get_agent_metrics(),
        }
    }

    /// AI diagnosis when available, the rule-based fallback otherwise. Never fails.
    pub async fn diagnose(&self) -> Diagnosis {
        let payload = self.diagnosis_payload();
        self.ctx.diagnosis.diagnose(&payload).await
    }

    pub fn build_export(&self) -> MonitoringExport {
        let summary = self.get_monitoring_summary();
        MonitoringExport {
            timestamp: summary.timestamp,
            system_metrics: summary.system.sample.clone(),
            system_health: summary.system,
            agent_metrics: summary.agent_metrics,
            health: summary.health,
            alerts: summary.alerts,
            trends: summary.trends,
            registry: summary.registry,
            ai_diagnosis: self.diagnosis_status(),
        }
    }

    /// Writes the JSON snapshot atomically. Does not contact the diagnosis collaborator.
    pub fn export_monitoring_data(&self, path: impl AsRef<Path>) -> NavigatorResult<()> {
        let path = path.as_ref();
        let export = self.build_export();
        let json = serde_json::to_vec_pretty(&export)?;
        write_atomically(path, &json)?;

        info!(
            path = %path.display(),
            agents = export.agent_metrics.len(),
            status = %export.health.status,
            "Monitoring data exported"
        );
        Ok(())
    }

    pub fn export_metrics(&self, path: impl AsRef<Path>) -> NavigatorResult<()> {
        self.ctx.registry.export_to_file(path)
    }

    // ------------------------------------------------------------------
    // Background loop
    // ------------------------------------------------------------------

    /// One background iteration: sample, score, then write configured exports.
    fn run_cycle(&self) {
        let sample = self.collect_once();
        let health = self.get_health_status();

        if let Err(e) = self
            .ctx
            .registry
            .set_gauge(HEALTH_SCORE, health.score, Labels::new())
        {
            warn!(error = %e, "Failed to update health score gauge");
        }

        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            score = health.score,
            status = %health.status,
            "Monitoring cycle complete"
        );

        let exporter = &self.ctx.config.exporter;
        if let Some(path) = &exporter.export_path {
            if let Err(e) = self.export_monitoring_data(path) {
                warn!(path = %path.display(), error = %e, "Periodic snapshot export failed");
            }
        }
        if let Some(path) = &exporter.metrics_path {
            if let Err(e) = self.export_metrics(path) {
                warn!(path = %path.display(), error = %e, "Periodic metrics export failed");
            }
        }
    }

    pub async fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Monitoring loop is already running");
            return;
        }

        let interval = Duration::from_secs(self.ctx.config.monitor.interval_secs.max(1));
        info!(
            interval_secs = interval.as_secs(),
            "Starting monitoring background task"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        let agent = self.clone();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while agent.is_running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                if !agent.is_running.load(Ordering::SeqCst) {
                    break;
                }

                agent.run_cycle();
            }

            info!("Monitoring background task stopped");
        });

        *self.task_handle.write().await = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            warn!("Monitoring loop is not running");
            return;
        }

        info!("Stopping monitoring loop...");
        if let Some(shutdown_tx) = self.shutdown.lock().take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.task_handle.write().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Error waiting for monitoring task to stop");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Clears tracked executions, registry contents and trend history.
    pub fn reset(&self) -> NavigatorResult<()> {
        if self.is_running() {
            return Err(NavigatorError::Internal(
                "cannot reset while the monitoring loop is running".to_string(),
            ));
        }

        self.ctx.tracker.reset();
        self.ctx.registry.reset();
        self.ctx.trends.clear();
        self.running_by_agent.clear();
        self.describe_metrics();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthLevel;

    struct SteadySource;

    impl MetricSource for SteadySource {
        fn sample(&self) -> NavigatorResult<MetricSample> {
            Ok(MetricSample::new(25.0, 40.0, 4096, 50.0, 8192, 12))
        }
    }

    fn agent() -> MonitoringAgent {
        let ctx = MonitoringContext::with_source(NavigatorConfig::default(), Arc::new(SteadySource))
            .with_diagnosis(DiagnosisCapability::unavailable("disabled in tests"));
        MonitoringAgent::new(ctx)
    }

    #[test]
    fn test_execution_metrics_are_emitted() {
        let agent = agent();
        let key = agent.start_execution("finance", "ratios");
        let running = Labels::from([("agent", "finance")]);
        assert_eq!(agent.registry().get_gauge(RUNNING_EXECUTIONS, &running), Some(1.0));

        agent
            .end_execution(&key, ExecutionStatus::Completed, ExecutionOutcome::new())
            .unwrap();

        assert_eq!(agent.registry().get_gauge(RUNNING_EXECUTIONS, &running), Some(0.0));
        assert_eq!(
            agent.registry().get_counter(
                EXECUTIONS_TOTAL,
                &Labels::from([("agent", "finance"), ("status", "completed")])
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_failed_end_does_not_touch_gauge() {
        let agent = agent();
        let key = agent.start_execution("legal", "risk");
        agent
            .end_execution(&key, ExecutionStatus::Failed, ExecutionOutcome::new())
            .unwrap();
        assert!(agent
            .end_execution(&key, ExecutionStatus::Completed, ExecutionOutcome::new())
            .is_err());

        let running = Labels::from([("agent", "legal")]);
        assert_eq!(agent.registry().get_gauge(RUNNING_EXECUTIONS, &running), Some(0.0));
    }

    #[tokio::test]
    async fn test_track_records_outcome() {
        let agent = agent();

        let ok: Result<u32, String> = agent.track("news", "collect", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u32, String> = agent
            .track("news", "collect", async { Err("rate limited".to_string()) })
            .await;
        assert!(err.is_err());

        let metrics = agent.get_agent_metrics();
        assert_eq!(metrics["news"].completed_executions, 1);
        assert_eq!(metrics["news"].failed_executions, 1);
        let failed = agent
            .tracker()
            .recent_executions(10)
            .into_iter()
            .find(|r| r.status == ExecutionStatus::Failed)
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_collect_once_feeds_trends_and_gauges() {
        let agent = agent();
        agent.collect_once();

        assert_eq!(
            agent.registry().get_gauge(SYSTEM_CPU_PERCENT, &Labels::new()),
            Some(25.0)
        );
        assert_eq!(agent.trends().data_points("cpu_percent"), 1);
        assert_eq!(agent.monitor().history().len(), 1);
    }

    #[test]
    fn test_summary_is_read_only() {
        let agent = agent();
        agent.collect_once();
        let before = agent.registry().export_prometheus_format();

        let summary = agent.get_monitoring_summary();
        assert_eq!(summary.health.status, HealthLevel::Healthy);
        assert!(!summary.ai_diagnosis_available);

        assert_eq!(agent.registry().export_prometheus_format(), before);
        assert_eq!(agent.monitor().history().len(), 1);
        assert_eq!(agent.trends().data_points("cpu_percent"), 1);
    }

    #[tokio::test]
    async fn test_start_stop_loop() {
        let agent = agent();
        agent.start().await;
        assert!(agent.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.stop().await;

        assert!(!agent.is_running());
        assert!(agent.monitor().latest().is_some());
        assert!(agent.reset().is_ok());
        assert!(agent.tracker().is_empty());
    }
}
