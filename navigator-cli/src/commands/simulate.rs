use clap::Args;
use colored::Colorize;
use navigator_core::{DiagnosisCapability, MonitoringAgent, MonitoringContext, NavigatorConfig};
use std::time::Duration;

use super::agent_table;

#[derive(Args)]
pub struct SimulateArgs {
    /// Agents to simulate
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "financial,legal,reputation,synergy"
    )]
    agents: Vec<String>,

    /// Executions per agent
    #[arg(short = 'n', long, default_value_t = 5)]
    executions: u32,

    /// Every Nth execution fails; 0 disables failures
    #[arg(long, default_value_t = 3)]
    fail_every: u32,

    /// Simulated work per execution in milliseconds
    #[arg(long, default_value_t = 50)]
    work_ms: u64,

    /// Print the metrics exposition text afterwards
    #[arg(long)]
    show_metrics: bool,
}

pub async fn cmd_simulate(config: NavigatorConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let ctx = MonitoringContext::new(config)
        .with_diagnosis(DiagnosisCapability::unavailable("not used by simulate"));
    let agent = MonitoringAgent::new(ctx);

    println!(
        "{} {} agents x {} executions",
        "Simulating".cyan().bold(),
        args.agents.len(),
        args.executions
    );

    let mut handles = Vec::new();
    for (agent_index, agent_id) in args.agents.iter().enumerate() {
        for i in 0..args.executions {
            let agent = agent.clone();
            let agent_id = agent_id.clone();
            let fails = args.fail_every > 0 && (i + agent_index as u32 + 1) % args.fail_every == 0;
            let work = Duration::from_millis(args.work_ms * u64::from(i % 3 + 1));

            handles.push(tokio::spawn(async move {
                let task_id = format!("task{}", i + 1);
                let failure = format!("simulated failure in {}", task_id);
                agent
                    .track(&agent_id, &task_id, async move {
                        tokio::time::sleep(work).await;
                        if fails {
                            Err(failure)
                        } else {
                            Ok(())
                        }
                    })
                    .await
            }));
        }
    }

    for handle in handles {
        // failures are expected and already recorded by the tracker
        let _ = handle.await?;
    }

    println!();
    println!("{}", agent_table(&agent.get_agent_metrics()));

    let summary = agent.registry().get_metrics_summary();
    println!(
        "  {} {} series across {} metrics",
        "Registry:".bold(),
        summary.total_metrics,
        summary.metric_names
    );

    if args.show_metrics {
        println!();
        print!("{}", agent.registry().export_prometheus_format());
    }

    Ok(())
}
