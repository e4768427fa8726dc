use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Tally: vote ingestion and ranking engine",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a JSON-lines workload against an in-memory engine
    Simulate(SimulateArgs),
    /// Inspect or compact an intake write-ahead log
    Queue(QueueArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Script file, one operation per line
    pub script: PathBuf,
    /// Engine configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Starting clock value in ms since the Unix epoch (defaults to now)
    #[arg(long)]
    pub start_ms: Option<u64>,
}

#[derive(Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Subcommand)]
pub enum QueueAction {
    /// List events not yet acknowledged
    Inspect { wal: PathBuf },
    /// Rewrite the log keeping only events not yet acknowledged
    Compact { wal: PathBuf },
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub path: Option<PathBuf>,
}
