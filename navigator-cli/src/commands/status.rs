use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use navigator_core::{MonitoringAgent, NavigatorConfig};

use super::{agent_table, health_color, CPU_WARMUP};

pub async fn cmd_status(config: NavigatorConfig, format: &str, diagnose: bool) -> anyhow::Result<()> {
    let agent = MonitoringAgent::from_config(config);

    agent.collect_once();
    tokio::time::sleep(CPU_WARMUP).await;
    let sample = agent.collect_once();

    let summary = agent.get_monitoring_summary();
    let diagnosis = if diagnose {
        Some(agent.diagnose().await)
    } else {
        None
    };

    if format == "json" {
        let output = serde_json::json!({
            "summary": summary,
            "diagnosis": diagnosis,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let health = &summary.health;
    println!("{}", "M&A Navigator System Status".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!();

    let status_text = health.status.to_string().to_uppercase();
    let status_colored = match health_color(health.status) {
        Color::Green => status_text.green(),
        Color::Yellow => status_text.yellow(),
        Color::Red => status_text.red(),
        _ => status_text.dimmed(),
    };
    println!(
        "  {} {} (score {:.1})",
        "Health:".bold(),
        status_colored,
        health.score
    );
    println!("  {}", health.message.dimmed());
    println!();

    println!("  {}", "System Metrics".yellow().bold());
    println!("    CPU Usage:     {:>6.1}%", sample.cpu_percent);
    println!(
        "    Memory:        {:>6.1}% ({:.0} MB used)",
        sample.memory_percent,
        sample.memory_used_mb()
    );
    println!(
        "    Disk:          {:>6.1}% ({:.1} GB free)",
        sample.disk_usage_percent,
        sample.disk_free_gb()
    );
    println!("    Processes:     {:>6}", sample.process_count);

    if !summary.system.bottlenecks.is_empty() {
        println!();
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Resource").fg(Color::White),
                Cell::new("Severity").fg(Color::White),
                Cell::new("Value").fg(Color::White),
                Cell::new("Threshold").fg(Color::White),
            ]);
        for b in &summary.system.bottlenecks {
            table.add_row(vec![
                Cell::new(&b.resource),
                Cell::new(format!("{:?}", b.severity)),
                Cell::new(format!("{:.1}%", b.value)),
                Cell::new(format!("{:.1}%", b.threshold)),
            ]);
        }
        println!("{table}");
    }

    if !summary.agent_metrics.is_empty() {
        println!();
        println!("  {}", "Agent Activity".yellow().bold());
        println!("{}", agent_table(&summary.agent_metrics));
    }

    if let Some(diagnosis) = diagnosis {
        println!();
        let label = if diagnosis.ai_powered {
            "AI Diagnosis".yellow().bold()
        } else {
            "Rule-based Diagnosis".yellow().bold()
        };
        println!("  {}", label);
        println!("    {}", diagnosis.overall_health_assessment);
        for issue in &diagnosis.key_issues {
            println!("    {} {}", "•".red(), issue);
        }
        for rec in &diagnosis.recommendations {
            println!("    {} {}", "→".blue(), rec);
        }
        if let Some(reason) = &diagnosis.fallback_reason {
            println!("    {} {}", "AI unavailable:".dimmed(), reason.dimmed());
        }
    }

    println!();
    println!(
        "  {} {}",
        "Timestamp:".dimmed(),
        summary.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}
