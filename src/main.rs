//! taskgraph - run interdependent build rules concurrently.
//!
//! Usage:
//!   taskgraph run <target>   Run a rule and everything it depends on
//!   taskgraph list           List every rule in the workspace

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use taskgraph::output::ConsoleOutput;
use taskgraph::{Engine, Error, ProcessSupervisor, load_workspace, signals};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// taskgraph - run interdependent build rules concurrently
#[derive(Parser)]
#[command(name = "taskgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to start looking for WORKSPACE.yaml from (default: current directory)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    /// Log scheduling decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a target and its dependencies
    Run {
        /// Rule ID (`//pkg:name`), `.:name` for the current package, or
        /// `:name` for every rule with that name
        #[arg(value_name = "TARGET")]
        target: String,

        /// Maximum concurrent rules (default: from WORKSPACE.yaml, else CPU count)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },

    /// List all rules in the workspace
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run { target, jobs } => run(cli.workspace, target, jobs).await,
        Commands::List => list(cli.workspace),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn start_dir(workspace: Option<PathBuf>) -> Result<PathBuf, Error> {
    match workspace {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().map_err(|e| Error::io("read current directory", e)),
    }
}

/// Run a target, then keep any background processes alive until shutdown.
async fn run(workspace: Option<PathBuf>, target: String, jobs: Option<usize>) -> Result<(), Error> {
    let start = start_dir(workspace)?;
    let cancel = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(&cancel);

    let mut workspace = load_workspace(&start, Arc::new(ConsoleOutput), supervisor.clone())?;
    let cwd = std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .map_err(|e| Error::io("read current directory", e))?;
    let target = workspace.resolve_target(&cwd, &target)?;

    let engine = Engine::new(jobs.unwrap_or_else(|| workspace.config().concurrency_limit()));
    let mut tree = Vec::new();
    engine.tree(workspace.graph(), target.as_str(), &mut tree)?;
    print!("{}", String::from_utf8_lossy(&tree));

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = signals::wait_for_shutdown_signal().await {
            error!(error = %err, "failed to listen for shutdown signals");
            return;
        }
        info!("exiting...");
        signal_token.cancel();
    });

    let result = engine
        .execute(&cancel, workspace.graph(), target.as_str())
        .await;
    if result.is_err() {
        supervisor.cancel();
    }
    let background = supervisor.wait().await;

    match result.and(background) {
        Err(err) if err.is_cancelled() && cancel.is_cancelled() => Ok(()),
        other => other,
    }
}

/// Print the ID of every rule in the workspace, one per line.
fn list(workspace: Option<PathBuf>) -> Result<(), Error> {
    let start = start_dir(workspace)?;
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(&start, Arc::new(ConsoleOutput), supervisor)?;

    let mut out = Vec::new();
    Engine::default().list(workspace.graph(), &mut out)?;
    print!("{}", String::from_utf8_lossy(&out));
    Ok(())
}
