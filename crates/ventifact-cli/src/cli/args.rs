use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ventifact",
    version,
    about = "Content-addressed, deduplicating store for CI test results"
)]
pub struct Cli {
    /// SQLite database path (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Ingest(IngestArgs),
    Maintain(MaintainArgs),
    Recent(RecentArgs),
    Stats,
}

#[derive(clap::Args, Debug, Clone)]
pub struct IngestArgs {
    /// JSON file holding an array of test runs (commit ids hex-encoded)
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MaintainArgs {
    /// Retention window for test runs, ISO-8601 (overrides TEST_RUN_LIFETIME)
    #[arg(long)]
    pub test_run_lifetime: Option<String>,

    /// Retention window for merged PRs, ISO-8601 (overrides MERGED_PR_LIFETIME)
    #[arg(long)]
    pub pr_lifetime: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RecentArgs {
    /// Number of rows to print
    #[arg(long, default_value_t = 20)]
    pub count: u32,

    /// Print flakes instead of runs
    #[arg(long)]
    pub flakes: bool,

    /// Lower bound (exclusive), RFC 3339
    #[arg(long)]
    pub since: Option<String>,
}
