use colored::Colorize;
use navigator_core::{MonitoringAgent, NavigatorConfig};
use std::path::Path;

use super::CPU_WARMUP;

pub async fn cmd_export(
    config: NavigatorConfig,
    path: &Path,
    metrics: Option<&Path>,
) -> anyhow::Result<()> {
    let agent = MonitoringAgent::from_config(config);

    agent.collect_once();
    tokio::time::sleep(CPU_WARMUP).await;
    agent.collect_once();

    agent.export_monitoring_data(path)?;
    println!(
        "{} Snapshot written to {}",
        "✓".green().bold(),
        path.display()
    );

    if let Some(metrics_path) = metrics {
        agent.export_metrics(metrics_path)?;
        println!(
            "{} Metrics written to {}",
            "✓".green().bold(),
            metrics_path.display()
        );
    }

    Ok(())
}
