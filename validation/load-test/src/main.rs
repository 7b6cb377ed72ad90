//! Load test CLI for the WebSocket chat service.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use load_test::config::WarmupConfig;
use load_test::{LoadRunner, ResultsReport, StatusPolicy, TestConfig};

#[derive(Parser)]
#[command(name = "load-test")]
#[command(about = "Load testing tool for the WebSocket chat service", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override total number of messages
        #[arg(short, long)]
        messages: Option<u64>,

        /// Override service address (host:port)
        #[arg(long, env = "CHAT_SERVICE_ADDRESS")]
        host: Option<String>,

        /// Write per-message telemetry CSV to this path
        #[arg(long)]
        telemetry: Option<PathBuf>,

        /// Count ERROR status replies as failures
        #[arg(long)]
        strict: bool,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Run a quick smoke test
    Quick {
        /// Service address (host:port)
        #[arg(long, env = "CHAT_SERVICE_ADDRESS", default_value = "localhost:8080")]
        host: String,

        /// Number of workers
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Number of messages
        #[arg(short, long, default_value = "1000")]
        messages: u64,

        /// Warmup round trips per worker (0 disables the prediction)
        #[arg(long, default_value = "0")]
        warmup: u64,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

fn init_tracing(log_level: &str, json: bool) -> anyhow::Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn print_results(results: &load_test::TestResults, output: &str) -> anyhow::Result<()> {
    match output {
        "json" => {
            println!("{}", ResultsReport::format_json(results)?);
        }
        "csv" => {
            println!("{}", ResultsReport::csv_header());
            println!("{}", ResultsReport::format_csv(results));
        }
        _ => {
            println!("{}", ResultsReport::format_table(results));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run {
            scenario,
            workers,
            messages,
            host,
            telemetry,
            strict,
            output,
        } => {
            eprintln!("Loading scenario: {}", scenario.display());

            let mut config = TestConfig::from_file(&scenario)?;

            // Apply overrides
            if let Some(w) = workers {
                config.workers = w;
            }
            if let Some(m) = messages {
                config.total_messages = m;
            }
            if let Some(h) = host {
                config.service_address = h;
            }
            if telemetry.is_some() {
                config.metrics.telemetry_csv = telemetry;
            }
            if strict {
                config.status_policy = StatusPolicy::Strict;
            }

            config.validate()?;

            eprintln!("✓ Configuration loaded successfully");
            eprintln!("  Name: {}", config.name);
            eprintln!("  Description: {}", config.description);
            eprintln!("  Service: {}", config.service_address);
            eprintln!("  Workers: {}", config.workers);
            eprintln!("  Messages: {}", config.total_messages);
            eprintln!();

            let results = LoadRunner::new(config).run().await?;
            print_results(&results, &output)
        }
        Commands::Quick {
            host,
            workers,
            messages,
            warmup,
        } => {
            eprintln!("Running quick test:");
            eprintln!("  Service: {}", host);
            eprintln!("  Workers: {}", workers);
            eprintln!("  Messages: {}", messages);
            eprintln!();

            let mut config = TestConfig::new("quick", host);
            config.description = "Quick smoke test".to_string();
            config.workers = workers;
            config.total_messages = messages;
            if warmup > 0 {
                config.warmup = Some(WarmupConfig {
                    messages_per_worker: warmup,
                });
            }

            let results = LoadRunner::new(config).run().await?;
            print_results(&results, "table")
        }
        Commands::List { dir } => {
            println!("Available scenarios in {}:", dir.display());
            println!();

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    eprintln!("Error reading directory: {}", e);
                    eprintln!("Make sure the directory exists and is readable");
                    return Ok(());
                }
            };

            let mut scenarios = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
                    continue;
                }
                let Some(file_name) = path.file_name() else {
                    continue;
                };
                if let Ok(config) = TestConfig::from_file(&path) {
                    scenarios.push((
                        file_name.to_string_lossy().to_string(),
                        config.name,
                        config.description,
                    ));
                }
            }

            scenarios.sort_by(|a, b| a.0.cmp(&b.0));

            if scenarios.is_empty() {
                println!("No scenario files found");
            } else {
                for (filename, name, desc) in scenarios {
                    println!("  {} - {}", filename, name);
                    println!("    {}", desc);
                    println!();
                }
            }

            Ok(())
        }
    }
}
