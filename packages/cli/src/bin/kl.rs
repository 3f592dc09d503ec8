// ABOUTME: Entry point of the kl binary
// ABOUTME: Parses arguments, installs logging and maps failures to exit codes

use clap::{Parser, Subcommand};
use colored::*;
use std::process;

mod cli;

use cli::devbox::BoxArgs;

#[derive(Parser)]
#[command(name = "kl")]
#[command(about = "kl - local devbox containers bound to remote environments")]
#[command(version)]
struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the devbox of a workspace
    Box(BoxArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    klbox_cli::logging::init(cli.verbose);

    match handle_command(cli.command).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Box(args) => cli::devbox::handle_box_command(args).await,
    }
}
