use clap::{Parser, Subcommand};
use colored::Colorize;
use navigator_core::{LoggingConfig, NavigatorConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{cmd_export, cmd_serve, cmd_simulate, cmd_status, SimulateArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "navigator")]
#[command(version = VERSION)]
#[command(about = "M&A Navigator - agent execution tracking and system monitoring")]
#[command(long_about = r#"
The monitoring core of the M&A Navigator. It samples host resources, tracks
agent executions, exports metrics in the text exposition format and projects
resource trends ahead of time.

Use 'navigator serve' to run the sampling loop and the /metrics endpoint, or
'navigator status' for a one-shot health report.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the default search path
    #[arg(short, long, global = true, env = "NAVIGATOR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the background sampling loop and the HTTP metrics endpoint")]
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Sample and export without binding the HTTP endpoint
        #[arg(long)]
        no_http: bool,
    },

    #[command(about = "Sample the host once and print a health report")]
    Status {
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Also request a diagnosis (AI when configured, rule-based otherwise)
        #[arg(short, long)]
        diagnose: bool,
    },

    #[command(about = "Write a JSON monitoring snapshot to a file")]
    Export {
        path: PathBuf,

        /// Also write the metrics exposition text to this file
        #[arg(short, long)]
        metrics: Option<PathBuf>,
    },

    #[command(about = "Run synthetic agent executions through the tracker")]
    Simulate(SimulateArgs),

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.logging);

    match run(cli.command, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<NavigatorConfig> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            NavigatorConfig::load_from_paths(vec![path.clone()])?
        }
        None => NavigatorConfig::load()?,
    };
    Ok(config)
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

async fn run(command: Commands, config: NavigatorConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            no_http,
        } => cmd_serve(config, host, port, no_http).await,
        Commands::Status { format, diagnose } => cmd_status(config, &format, diagnose).await,
        Commands::Export { path, metrics } => cmd_export(config, &path, metrics.as_deref()).await,
        Commands::Simulate(args) => cmd_simulate(config, args).await,
        Commands::Version { detailed } => cmd_version(detailed),
    }
}

fn cmd_version(detailed: bool) -> anyhow::Result<()> {
    if detailed {
        println!("{}", "M&A Navigator Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} {}", "Core:".bold(), navigator_core::VERSION);
        println!("  {:<15} Apache-2.0", "License:".bold());
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("navigator {}", VERSION);
    }

    Ok(())
}
