// ABOUTME: `kl box` subcommands wiring the Docker engine and HTTP services into DevboxManager
// ABOUTME: start, stop, restart, exec, info, ps and reload for the current workspace

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;
use klbox_cli::output;
use klbox_cli::{InquirePrompter, SpinnerProgress};
use klbox_config::constants::KL_SESSION;
use klbox_config::non_empty_env;
use klbox_engine::{
    DevboxError, DevboxManager, DockerEngine, EngineConfig, HttpEnvironmentService,
    HttpPackageIndex, Progress, Workspace,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

/// Exit code used when interrupted, as shells do for SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Args)]
pub struct BoxArgs {
    /// Workspace directory (defaults to the current directory)
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: BoxCommands,
}

#[derive(Subcommand)]
pub enum BoxCommands {
    /// Start the devbox, creating it if needed
    Start,

    /// Stop the devbox
    Stop {
        /// Stop every devbox on this machine
        #[arg(long)]
        all: bool,

        /// Remove the container after stopping it
        #[arg(long)]
        rm: bool,
    },

    /// Stop and start the devbox so it picks up environment changes
    Restart,

    /// Run a command in the devbox (a login shell when omitted)
    Exec {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show the devbox of this workspace
    Info,

    /// List every devbox on this machine
    Ps,

    /// Re-resolve the environment and update the devbox record
    Reload,
}

/// Engine errors carry a stage tag and, for boot failures, the container's last output
fn engine_error(err: DevboxError) -> anyhow::Error {
    anyhow::anyhow!(output::describe_error(&err).join("\n"))
}

async fn build_manager(progress: Arc<SpinnerProgress>) -> Result<DevboxManager> {
    let config = EngineConfig::from_env().map_err(engine_error)?;
    let engine = DockerEngine::connect()
        .await
        .context("failed to connect to docker, is it running?")?;
    let service = HttpEnvironmentService::new(&config.base_url, non_empty_env(KL_SESSION))?;
    let index = HttpPackageIndex::new(config.package_index_url.clone())?;

    Ok(DevboxManager::new(
        config,
        Arc::new(engine),
        Arc::new(service),
        Arc::new(index),
    )
    .with_prompter(Arc::new(InquirePrompter))
    .with_progress(progress))
}

fn workspace_dir(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("failed to read the current directory"),
    }
}

async fn open(manager: &DevboxManager, path: Option<PathBuf>) -> Result<Workspace> {
    let dir = workspace_dir(path)?;
    manager.open_workspace(&dir).await.map_err(engine_error)
}

pub async fn handle_box_command(args: BoxArgs) -> Result<i32> {
    let interactive = std::io::stderr().is_terminal();
    let progress = Arc::new(match &args.command {
        BoxCommands::Start | BoxCommands::Restart | BoxCommands::Reload if interactive => {
            SpinnerProgress::new()
        }
        _ => SpinnerProgress::hidden(),
    });

    let manager = build_manager(progress.clone()).await?;

    // In-flight engine calls are abandoned, not rolled back
    let result = tokio::select! {
        result = run(&manager, args, progress.as_ref()) => result,
        _ = shutdown_signal() => {
            progress.finish();
            eprintln!("{}", "interrupted".yellow());
            Ok(INTERRUPTED_EXIT_CODE)
        }
    };
    progress.finish();
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run(manager: &DevboxManager, args: BoxArgs, progress: &SpinnerProgress) -> Result<i32> {
    match args.command {
        BoxCommands::Start => {
            let ws = open(manager, args.path).await?;
            let start = manager.start(&ws).await.map_err(engine_error)?;
            progress.finish();
            print_start(&start);
        }
        BoxCommands::Restart => {
            let ws = open(manager, args.path).await?;
            let start = manager.restart(&ws).await.map_err(engine_error)?;
            progress.finish();
            print_start(&start);
        }
        BoxCommands::Stop { all: true, .. } => {
            let stopped = manager.stop_all().await.map_err(engine_error)?;
            println!("{}", format!("stopped {} devbox(es)", stopped.len()).green());
        }
        BoxCommands::Stop { all: false, rm } => {
            let ws = open(manager, args.path).await?;
            let outcome = manager.stop(&ws, rm).await.map_err(engine_error)?;
            println!("{}", output::stop_summary(&outcome).green());
        }
        BoxCommands::Exec { command } => {
            let ws = open(manager, args.path).await?;
            let tty = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
            let code = manager
                .exec(&ws, command, tty, tokio::io::stdin(), tokio::io::stdout())
                .await
                .map_err(engine_error)?;
            return Ok(i32::try_from(code).unwrap_or(1));
        }
        BoxCommands::Info => {
            let ws = open(manager, args.path).await?;
            match manager.info(&ws).await.map_err(engine_error)? {
                Some(info) => {
                    for line in output::box_details(&info) {
                        println!("{}", line);
                    }
                }
                None => println!("{}", "no devbox for this workspace".yellow()),
            }
        }
        BoxCommands::Ps => {
            let boxes = manager.list().await.map_err(engine_error)?;
            if boxes.is_empty() {
                println!("{}", "no devboxes".yellow());
            } else {
                println!("{}", output::box_table(&boxes));
            }
        }
        BoxCommands::Reload => {
            let ws = open(manager, args.path).await?;
            let outcome = manager.reload(&ws).await.map_err(engine_error)?;
            progress.finish();
            println!("{}", output::reload_summary(outcome).green());
        }
    }
    Ok(0)
}

fn print_start(report: &klbox_engine::StartReport) {
    let lines = output::start_summary(report);
    for (i, line) in lines.iter().enumerate() {
        if i + 1 == lines.len() {
            println!("{}", line.cyan());
        } else {
            println!("{}", line.green());
        }
    }
}
