//! sentinel - merge-readiness monitor for GitHub pull requests

mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "sentinel",
    version,
    about = "Merge-readiness monitor for GitHub pull requests"
)]
struct Cli {
    /// Path to the repository working copy
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor one or more PRs until they merge, fail, or time out
    Run(cli::run::RunArgs),
    /// Show persisted monitor status for a PR without contacting the API
    Status(cli::status::StatusArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout carries only the JSON event stream.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_sentinel=info,sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run(args) => cli::run::run(&cli.path, args).await,
        Command::Status(args) => cli::status::run(&cli.path, &args),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(cli::EXIT_FAILURE)
        }
    }
}
