mod export;
mod serve;
mod simulate;
mod status;

pub use export::cmd_export;
pub use serve::cmd_serve;
pub use simulate::{cmd_simulate, SimulateArgs};
pub use status::cmd_status;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use navigator_core::{AgentMetrics, HealthLevel};
use std::collections::BTreeMap;
use std::time::Duration;

/// sysinfo needs two CPU refreshes this far apart for a meaningful reading.
pub(crate) const CPU_WARMUP: Duration = Duration::from_millis(250);

pub(crate) fn health_color(level: HealthLevel) -> Color {
    match level {
        HealthLevel::Healthy => Color::Green,
        HealthLevel::Warning | HealthLevel::Degraded => Color::Yellow,
        HealthLevel::Critical => Color::Red,
        HealthLevel::Unknown => Color::DarkGrey,
    }
}

pub(crate) fn agent_table(metrics: &BTreeMap<String, AgentMetrics>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Agent").fg(Color::White),
            Cell::new("Total").fg(Color::White),
            Cell::new("Running").fg(Color::White),
            Cell::new("Completed").fg(Color::White),
            Cell::new("Failed").fg(Color::White),
            Cell::new("Success").fg(Color::White),
            Cell::new("Avg Duration").fg(Color::White),
        ]);

    for (agent_id, m) in metrics {
        let success_cell = match m.success_rate {
            None => Cell::new("no data").fg(Color::DarkGrey),
            Some(rate) if rate >= 0.8 => Cell::new(format!("{:.1}%", rate * 100.0)).fg(Color::Green),
            Some(rate) if rate >= 0.5 => Cell::new(format!("{:.1}%", rate * 100.0)).fg(Color::Yellow),
            Some(rate) => Cell::new(format!("{:.1}%", rate * 100.0)).fg(Color::Red),
        };

        let duration = m
            .avg_duration_seconds
            .map(|d| format!("{:.3}s", d))
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(agent_id),
            Cell::new(m.total_executions),
            Cell::new(m.running_executions),
            Cell::new(m.completed_executions),
            Cell::new(m.failed_executions),
            success_cell,
            Cell::new(duration),
        ]);
    }

    table
}
