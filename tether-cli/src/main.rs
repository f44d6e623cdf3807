//! Tether - drive interactive command-line agents from scripts.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_api::{CommandSpec, ConfirmationRule, DriveOutput, DriveStatus};
use tether_kernel::{DriveError, Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

/// Exit status when the subprocess was still working when tether gave up.
const EXIT_STILL_RUNNING: u8 = 2;

/// Tether -- drive interactive command-line agents through a pseudo-terminal.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to <config dir>/tether/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch an agent, hand it a task and wait for it to go idle
    Run {
        /// Task text to inject
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the task text from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Overall deadline in seconds (0 means 120)
        #[arg(long, default_value_t = 0)]
        timeout: i64,

        /// Working directory for the agent
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Program and arguments to execute
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Run a command, answering confirmation prompts from a rules file
    Gate {
        /// JSON array of {pattern, response, criteria} rules
        #[arg(long)]
        rules: PathBuf,

        /// Overall deadline in seconds (0 means 120)
        #[arg(long, default_value_t = 0)]
        timeout: i64,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Program and arguments to execute
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            payload,
            payload_file,
            timeout,
            cwd,
            command,
        } => {
            let payload = match (payload, payload_file) {
                (Some(text), _) => text,
                (None, Some(path)) => read_payload(&path)?,
                (None, None) => String::new(),
            };
            let spec = command_spec(&command, timeout, cwd)?;
            let engine = Engine::new(config)?;

            tracing::info!("driving {}", spec.display_line());
            report(engine.drive_task_async(spec, payload).await)
        }
        Commands::Gate {
            rules,
            timeout,
            cwd,
            command,
        } => {
            let rules = load_rules(&rules)?;
            let spec = command_spec(&command, timeout, cwd)?;
            let engine = Engine::new(config)?;

            tracing::info!("gating {} with {} rules", spec.display_line(), rules.len());
            report(engine.run_gate_async(spec, rules).await)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Stdout carries the captured output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    Ok(config)
}

fn read_payload(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read payload {}", path.display()))?;
    // The engine terminates the payload itself.
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

fn load_rules(path: &Path) -> Result<Vec<ConfirmationRule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse rules {}", path.display()))
}

fn command_spec(command: &[String], timeout: i64, cwd: Option<PathBuf>) -> Result<CommandSpec> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("no command provided after --"))?;

    let mut spec = CommandSpec::new(program.as_str())
        .args(args.iter().cloned())
        .timeout_secs(timeout);
    if let Some(dir) = cwd {
        spec = spec.cwd(dir);
    }
    Ok(spec)
}

/// Print captured output on stdout, whatever the outcome, and pick the exit
/// status.
fn report(result: Result<DriveOutput, DriveError>) -> Result<ExitCode> {
    let (text, code) = match result {
        Ok(DriveOutput {
            status: DriveStatus::Completed,
            text,
        }) => (text, ExitCode::SUCCESS),
        Ok(DriveOutput {
            status: DriveStatus::StillRunning(diagnostic),
            text,
        }) => {
            eprintln!("tether: {diagnostic}");
            (text, ExitCode::from(EXIT_STILL_RUNNING))
        }
        Err(err) => {
            eprintln!("tether: {err}");
            (err.into_output(), ExitCode::FAILURE)
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(code)
}
