//! Command line argument parsing for the Semantra CLI using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Semantra - semantic search over structured records
#[derive(Parser, Debug, Clone)]
#[command(name = "semantra")]
#[command(about = "Semantic search over structured records")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SemantraArgs {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "FILE", env = "SEMANTRA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl SemantraArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n + 1,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an index over the given fields
    Create(CreateArgs),

    /// Insert records from a JSON array or JSONL file
    Insert(InsertArgs),

    /// Search an index with free text
    Search(SearchArgs),

    /// Fetch records by id
    Get(IdsArgs),

    /// Delete records by id
    Delete(IdsArgs),

    /// Drop an index and everything in it
    Drop(NameArgs),

    /// Show index statistics
    Stat(NameArgs),

    /// List configured indexes
    List,
}

impl Command {
    /// Whether the command changes state and must be flushed.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Create(_) | Command::Insert(_) | Command::Delete(_) | Command::Drop(_)
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[arg(value_name = "INDEX")]
    pub name: String,

    /// Fields whose text is embedded (comma-separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub fields: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InsertArgs {
    #[arg(value_name = "INDEX")]
    pub name: String,

    /// Record file (JSON array or JSONL)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(value_name = "INDEX")]
    pub name: String,

    /// Query text
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Maximum number of results to return
    #[arg(short, long, default_value = "10")]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct IdsArgs {
    #[arg(value_name = "INDEX")]
    pub name: String,

    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct NameArgs {
    #[arg(value_name = "INDEX")]
    pub name: String,
}
