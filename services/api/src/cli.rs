use crate::demo::{run_demo, DemoArgs};
use crate::server;
use crate::sync::{run_sync, SyncArgs};
use clap::{Args, Parser, Subcommand};
use mindlab::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "MindLab",
    about = "Serve, sync, and demonstrate MindLab self-assessments from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Load test definitions and write them into the store
    Sync(SyncArgs),
    /// Run a scripted session against a bundled test and print the report
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// SQLite database file; without one sessions live in memory
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
    /// Directory holding test definition JSON files
    #[arg(long)]
    pub(crate) definitions: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sync(args) => run_sync(args),
        Command::Demo(args) => run_demo(args),
    }
}
