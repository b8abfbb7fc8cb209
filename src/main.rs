use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{GateConfig, LoggingConfig};
use tollgate::gate::AdmissionService;
use tollgate::ratelimit::PolicySet;

#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "Per-caller token bucket admission gate")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overriding the configured level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read `check <policy> <identifier>` and `status <identifier>` lines
    /// from stdin and print one JSON result per line
    Replay,
    /// Fire a series of requests from one identifier and summarize the outcome
    Burst {
        /// Policy to evaluate against (defaults to the configured default)
        #[arg(long)]
        policy: Option<String>,
        #[arg(long, default_value = "127.0.0.1")]
        identifier: String,
        #[arg(long, default_value_t = 15)]
        requests: u32,
        /// Delay between requests
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// Print the effective configuration
    Policies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json_logs;

    init_tracing(&config.logging);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policies = Arc::new(PolicySet::from_config(&config)?);
    info!(
        default_policy = %policies.default_policy(),
        "Rate limit policies initialized"
    );

    match cli.command {
        Command::Replay => replay(policies).await?,
        Command::Burst {
            policy,
            identifier,
            requests,
            interval_ms,
        } => {
            let policy = policy.unwrap_or_else(|| policies.default_policy().to_string());
            burst(policies, &policy, &identifier, requests, interval_ms).await?
        }
        Command::Policies => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Stdout carries command output; logs go to stderr.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// A single instruction read by `replay`.
#[derive(Debug, PartialEq)]
enum ReplayLine<'a> {
    Check { policy: &'a str, identifier: &'a str },
    Status { identifier: &'a str },
    Skip,
}

fn parse_replay_line(line: &str) -> Result<ReplayLine<'_>, String> {
    let mut words = line.split_whitespace();
    let parsed = match (words.next(), words.next(), words.next()) {
        (None, _, _) => ReplayLine::Skip,
        (Some(word), _, _) if word.starts_with('#') => ReplayLine::Skip,
        (Some("check"), Some(policy), Some(identifier)) => ReplayLine::Check { policy, identifier },
        (Some("status"), Some(identifier), None) => ReplayLine::Status { identifier },
        _ => return Err(format!("unrecognized line: {}", line.trim())),
    };
    if matches!(parsed, ReplayLine::Check { .. }) && words.next().is_some() {
        return Err(format!("unrecognized line: {}", line.trim()));
    }
    Ok(parsed)
}

async fn replay(policies: Arc<PolicySet>) -> anyhow::Result<()> {
    let service = AdmissionService::new(policies.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("End of input reached");
            break;
        };

        let output = match parse_replay_line(&line) {
            Ok(ReplayLine::Skip) => continue,
            Ok(ReplayLine::Check { policy, identifier }) => {
                match service.admit_identifier(policy, identifier).await {
                    Ok(admission) => serde_json::to_value(admission)?,
                    Err(e) => json!({ "error": e.to_string() }),
                }
            }
            Ok(ReplayLine::Status { identifier }) => serde_json::to_value(policies.status(identifier))?,
            Err(e) => {
                warn!(error = %e, "Skipping malformed replay line");
                json!({ "error": e })
            }
        };

        stdout.write_all(format!("{}\n", output).as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn burst(
    policies: Arc<PolicySet>,
    policy: &str,
    identifier: &str,
    requests: u32,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let service = AdmissionService::new(policies);
    let mut allowed = 0u32;

    info!(policy = %policy, identifier = %identifier, requests, "Starting burst");

    for request in 1..=requests {
        let admission = service.admit_identifier(policy, identifier).await?;
        if admission.is_allowed() {
            allowed += 1;
        }
        println!("{}", json!({ "request": request, "admission": admission }));

        if request < requests && interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }

    let success_rate = if requests == 0 {
        0.0
    } else {
        allowed as f64 / requests as f64 * 100.0
    };
    println!(
        "{}",
        json!({
            "requests": requests,
            "allowed": allowed,
            "rejected": requests - allowed,
            "success_rate": success_rate,
        })
    );

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
