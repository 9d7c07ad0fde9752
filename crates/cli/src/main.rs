use clap::{Parser, Subcommand};
use replica_cli::commands::{diff, digest, inspect, verify};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "replica")]
#[command(about = "Replica Forensic CLI - inspect and compare node data directories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ledger and snapshot status of a node directory.
    Inspect {
        /// Node directory (`<data_dir>/<node_id>`).
        dir: PathBuf,
    },
    /// Check the snapshot against a fresh replay of the ledger
    Verify { dir: PathBuf },
    /// Print per-table projection digests
    Digest {
        dir: PathBuf,

        /// Replay only up to this seq
        #[arg(long)]
        at: Option<u64>,
    },
    /// Compare two node directories
    Diff {
        left: PathBuf,
        right: PathBuf,

        /// Restrict the projection comparison to one table
        #[arg(long, short)]
        table: Option<String>,

        /// Print the comparison as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { dir } => inspect::run(&dir),
        Commands::Verify { dir } => verify::run(&dir),
        Commands::Digest { dir, at } => digest::run(&dir, at),
        Commands::Diff {
            left,
            right,
            table,
            json,
        } => diff::run(&left, &right, table, json),
    }
}
