//! Concurrent agent execution tracking.
//!
//! Records live in a sharded map keyed by execution key. A record is only ever
//! mutated while its entry lock is held, so readers see either the running
//! record or the fully finished one, never a mix.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{NavigatorError, NavigatorResult};
use crate::models::{AgentMetrics, ExecutionOutcome, ExecutionRecord, ExecutionStatus};

pub struct AgentExecutionTracker {
    records: DashMap<String, ExecutionRecord>,
}

impl Default for AgentExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentExecutionTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Registers a RUNNING record and returns its key.
    ///
    /// Keys have the form `{agent}_{task}_{micros}_{random}`; the random part
    /// is the first 12 hex digits of a v4 UUID.
    pub fn start_execution(&self, agent_id: &str, task_id: &str) -> String {
        loop {
            let key = generate_execution_key(agent_id, task_id);
            match self.records.entry(key.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(ExecutionRecord::new(
                        key.clone(),
                        agent_id.to_string(),
                        task_id.to_string(),
                    ));
                    debug!(
                        execution_key = %key,
                        agent_id = %agent_id,
                        task_id = %task_id,
                        "Execution started"
                    );
                    return key;
                }
            }
        }
    }

    /// Moves a RUNNING record to `status` and returns the finished record.
    pub fn end_execution(
        &self,
        execution_key: &str,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
    ) -> NavigatorResult<ExecutionRecord> {
        if !status.is_terminal() {
            return Err(NavigatorError::InvalidTerminalStatus(status.to_string()));
        }

        let finished = {
            let mut record = self
                .records
                .get_mut(execution_key)
                .ok_or_else(|| NavigatorError::ExecutionNotFound(execution_key.to_string()))?;

            if !record.is_running() {
                return Err(NavigatorError::ExecutionAlreadyFinished {
                    key: execution_key.to_string(),
                    status: record.status.to_string(),
                });
            }

            record.finish(status, outcome, Utc::now());
            record.clone()
        };

        match finished.status {
            ExecutionStatus::Failed => warn!(
                execution_key = %finished.execution_key,
                agent_id = %finished.agent_id,
                error = finished.error_message.as_deref().unwrap_or_default(),
                "Execution failed"
            ),
            _ => debug!(
                execution_key = %finished.execution_key,
                agent_id = %finished.agent_id,
                duration_secs = finished.duration_seconds().unwrap_or_default(),
                "Execution completed"
            ),
        }

        Ok(finished)
    }

    /// Same as [`end_execution`](Self::end_execution) with the status given as text.
    pub fn end_execution_str(
        &self,
        execution_key: &str,
        status: &str,
        outcome: ExecutionOutcome,
    ) -> NavigatorResult<ExecutionRecord> {
        let status: ExecutionStatus = status
            .parse()
            .map_err(|_| NavigatorError::InvalidTerminalStatus(status.to_string()))?;
        self.end_execution(execution_key, status, outcome)
    }

    /// Per-agent statistics derived from the current records.
    pub fn get_agent_metrics(&self) -> BTreeMap<String, AgentMetrics> {
        let mut grouped: BTreeMap<String, Vec<ExecutionRecord>> = BTreeMap::new();
        for entry in self.records.iter() {
            grouped
                .entry(entry.agent_id.clone())
                .or_default()
                .push(entry.value().clone());
        }

        grouped
            .into_iter()
            .map(|(agent_id, records)| {
                let metrics = AgentMetrics::from_records(agent_id.clone(), &records);
                (agent_id, metrics)
            })
            .collect()
    }

    pub fn get_agent_metrics_for(&self, agent_id: &str) -> Option<AgentMetrics> {
        let records = self.snapshot_where(|r| r.agent_id == agent_id);
        if records.is_empty() {
            None
        } else {
            Some(AgentMetrics::from_records(agent_id, &records))
        }
    }

    pub fn get_execution(&self, execution_key: &str) -> Option<ExecutionRecord> {
        self.records.get(execution_key).map(|r| r.value().clone())
    }

    pub fn running_executions(&self) -> Vec<ExecutionRecord> {
        let mut running = self.snapshot_where(ExecutionRecord::is_running);
        running.sort_by_key(|r| r.start_time);
        running
    }

    /// RUNNING records older than `threshold`. Their status is left untouched.
    pub fn long_running_executions(&self, threshold: Duration) -> Vec<ExecutionRecord> {
        let now = Utc::now();
        let limit = threshold.as_secs_f64();
        let mut stuck =
            self.snapshot_where(|r| r.is_running() && r.elapsed_seconds(now) > limit);
        stuck.sort_by_key(|r| r.start_time);
        stuck
    }

    /// Most recently started records first.
    pub fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        let mut all = self.snapshot_where(|_| true);
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        all.truncate(limit);
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reset(&self) {
        self.records.clear();
        debug!("Execution tracker reset");
    }

    fn snapshot_where(&self, predicate: impl Fn(&ExecutionRecord) -> bool) -> Vec<ExecutionRecord> {
        self.records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn generate_execution_key(agent_id: &str, task_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        agent_id,
        task_id,
        Utc::now().timestamp_micros(),
        &suffix[..12]
    )
}
