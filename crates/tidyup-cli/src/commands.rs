use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tidyup")]
#[command(about = "Finds and removes junk, duplicates and stale registry entries", long_about = None)]
pub struct Cli {
    /// Settings file to load instead of ./Tidyup.*
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one scan and print what was found
    Scan(ScanArgs),
    /// List stored result snapshots
    Backups,
    /// Load a stored snapshot and print its results
    Restore {
        /// Snapshot id, as shown by `backups`
        id: String,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// full, dump, duplicate or registry
    #[arg(default_value = "full")]
    pub mode: String,

    /// Delete files and registry values instead of only reporting them
    #[arg(long)]
    pub apply: bool,

    #[arg(long)]
    pub max_files: Option<usize>,

    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Also clear recent-document and typed-path history (full mode)
    #[arg(long)]
    pub privacy: bool,

    /// Extra duplicate-scan root; may be repeated
    #[arg(long = "path")]
    pub paths: Vec<PathBuf>,

    /// Store a snapshot of the results when the scan finishes
    #[arg(long)]
    pub backup: bool,

    /// Note saved with the snapshot
    #[arg(long, requires = "backup")]
    pub note: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}
