use colored::Colorize;
use navigator_core::{http, MonitoringAgent, NavigatorConfig};
use std::net::SocketAddr;
use tracing::info;

pub async fn cmd_serve(
    mut config: NavigatorConfig,
    host: Option<String>,
    port: Option<u16>,
    no_http: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.exporter.host = host;
    }
    if let Some(port) = port {
        config.exporter.port = port;
    }

    let serve_http = config.exporter.enabled && !no_http;
    let addr: SocketAddr = config.bind_address().parse()?;

    let agent = MonitoringAgent::from_config(config);
    agent.start().await;

    println!("{}", "M&A Navigator monitoring".cyan().bold());
    println!(
        "  {} Sampling every {}s",
        "→".blue(),
        agent.config().monitor.interval_secs
    );
    if let Some(path) = &agent.config().exporter.export_path {
        println!("  {} Snapshot export: {}", "→".blue(), path.display());
    }
    if let Some(path) = &agent.config().exporter.metrics_path {
        println!("  {} Metrics export:  {}", "→".blue(), path.display());
    }
    let diagnosis = agent.diagnosis_status();
    match diagnosis.reason {
        None => println!("  {} AI diagnosis:    {}", "→".blue(), "available".green()),
        Some(reason) => println!(
            "  {} AI diagnosis:    {} ({})",
            "→".blue(),
            "unavailable".yellow(),
            reason
        ),
    }

    let result = if serve_http {
        println!("  {} Endpoint:        http://{}/metrics", "→".blue(), addr);
        println!();
        http::serve(agent.clone(), addr, shutdown_signal())
            .await
            .map_err(anyhow::Error::from)
    } else {
        println!();
        shutdown_signal().await;
        Ok(())
    };

    info!("Shutdown requested");
    agent.stop().await;
    println!("{} {}", "✓".green().bold(), "Monitoring stopped".green());

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
