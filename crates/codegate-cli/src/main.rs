//! codegate — run or check JavaScript snippets through the execution gateway
//!
//! Usage:
//!   codegate run script.js [--timeout-ms 5000] [--config path/to/config.toml]
//!   codegate check script.js    # same screening `run` applies, nothing executed
//!
//! Snippets see a `tools` object backed by the demo tool table and a `log`
//! function; the outcome is printed to stdout as JSON.

mod demo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codegate_core::{ExecutionGateway, Executor, GatewayConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "codegate", version, about = "Capability-scoped script execution gateway")]
struct Cli {
    /// Gateway config file (defaults to <config dir>/codegate/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a snippet file against the demo tools
    Run {
        /// Path to the snippet (body of `async function (tools, log)`)
        file: PathBuf,

        /// Override the configured deadline
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Screen a snippet file (size limit and Safety Gate) without running it
    Check {
        file: PathBuf,
    },
    /// List the demo tools available to snippets
    Tools,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { file, timeout_ms } => {
            let snippet = read_snippet(&file)?;
            let config = match timeout_ms {
                Some(ms) => config.with_timeout(Duration::from_millis(ms)),
                None => config,
            };
            info!("Running {} (timeout {:?})", file.display(), config.timeout());

            let gateway = ExecutionGateway::new(config);
            let outcome = gateway.execute(&snippet, demo::demo_tools()).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Check { file } => {
            let snippet = read_snippet(&file)?;
            match ExecutionGateway::new(config).screen(&snippet) {
                Ok(()) => {
                    println!("ok: {}", file.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("rejected: {}: {}", file.display(), e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Tools => {
            let tools = demo::demo_tools();
            for name in tools.names() {
                let description = tools
                    .get(&name)
                    .map(|t| t.description().to_string())
                    .unwrap_or_default();
                println!("{:<8} {}", name, description);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Explicit path must exist; the default path is optional
fn load_config(explicit: Option<&Path>) -> Result<GatewayConfig> {
    if let Some(path) = explicit {
        return GatewayConfig::load(path);
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Loading config from {}", path.display());
            GatewayConfig::load(&path)
        }
        _ => Ok(GatewayConfig::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("codegate").join("config.toml"))
}

fn read_snippet(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snippet {}", path.display()))
}
