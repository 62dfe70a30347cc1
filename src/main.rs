use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use probebench::config::{Config, LogFormat};
use probebench::Engine;

#[derive(Parser)]
#[command(
    name = "probebench",
    about = "Test orchestration with performance/security probes and regression reporting",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $PROBEBENCH_CONFIG, then ./probebench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more suites and report; exits 1 if any unit failed or errored
    Run {
        /// Suite name from the config (repeatable)
        #[arg(long = "suite", required = true)]
        suites: Vec<String>,

        /// Run units concurrently, overriding the config
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Run units one at a time, overriding the config
        #[arg(long)]
        sequential: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show stored runs for a suite, most recent first
    History {
        #[arg(long)]
        suite: String,

        #[arg(long, default_value = "10")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List configured suites and their units
    List,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    // Logs go to stderr so stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Run {
            suites,
            parallel,
            sequential,
            json,
        } => {
            let parallel_override = match (parallel, sequential) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            tracing::info!(?suites, ?parallel_override, "Running suites");

            let engine = Engine::new(config)?;
            let selected = engine.build_suites(&suites)?;
            let outcome = engine.run_suites(selected, parallel_override).await?;

            if json {
                let output = serde_json::json!({
                    "run_id": outcome.run_id,
                    "result": outcome.result,
                    "success_rate": outcome.result.success_rate(),
                    "analysis": outcome.analysis,
                    "alerts": outcome.alerts,
                    "report_path": outcome.report.path,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("\n{}", probebench::report::format_summary(&outcome.result));
                println!("{:<30} | {:<13} | {:<8} | Details", "Unit", "Category", "Status");
                println!("{:-<30}-|-{:-<13}-|-{:-<8}-|-{:-<40}", "", "", "", "");
                for unit in &outcome.result.units {
                    println!(
                        "{:<30} | {:<13} | {:<8} | {}",
                        unit.name,
                        unit.category.map(|c| c.as_str()).unwrap_or("-"),
                        unit.status.to_string(),
                        unit.error_message
                            .as_deref()
                            .or(unit.skip_reason.as_deref())
                            .unwrap_or("")
                    );
                }
                if outcome.analysis.is_baseline_only() {
                    println!("\nNo prior data; this run establishes baseline data.");
                }
                if !outcome.alerts.is_empty() {
                    println!("\nAlerts:");
                    for alert in &outcome.alerts {
                        println!(" - {}", alert);
                    }
                }
                if outcome.report_written {
                    println!("\nReport: {}", outcome.report.path.display());
                }
                println!();
            }

            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Commands::History { suite, limit, json } => {
            let engine = Engine::new(config)?;
            let runs = engine.history(&suite, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("No runs recorded for '{}'.", suite);
            } else {
                println!(
                    "{:<25} | {:<36} | {:>5} | {:>6} | {:>6} | {:>5} | Rate",
                    "Timestamp", "Run", "Total", "Passed", "Failed", "Error"
                );
                println!(
                    "{:-<25}-|-{:-<36}-|-{:->5}-|-{:->6}-|-{:->6}-|-{:->5}-|-{:-<6}",
                    "", "", "", "", "", "", ""
                );
                for run in runs {
                    println!(
                        "{:<25} | {:<36} | {:>5} | {:>6} | {:>6} | {:>5} | {:.1}%",
                        run.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                        run.run_id,
                        run.total,
                        run.passed,
                        run.failed,
                        run.error,
                        run.success_rate() * 100.0
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            if config.suites.is_empty() {
                println!("No suites configured.");
            }
            for suite in &config.suites {
                let mode = match suite.parallel {
                    Some(true) => "parallel",
                    Some(false) => "sequential",
                    None if config.runner.parallel => "parallel",
                    None => "sequential",
                };
                println!("{} ({} units, {})", suite.name, suite.units.len(), mode);
                for unit in &suite.units {
                    println!("  - {} [{}, {}]", unit.name, unit.kind.label(), unit.category());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
