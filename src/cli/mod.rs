//! CLI command definitions and parsing
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pixseek",
    version,
    author = "neur0map",
    about = "Local semantic image search",
    long_about = "pixseek indexes the images under a directory with a local CLIP model and finds them \
                  by text or image queries. The index is kept in sync incrementally: only new or \
                  modified files are embedded, renamed files keep their vectors, and deleted files \
                  drop out of the results."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/pixseek/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the images under a directory (indexing it first)
    Search {
        /// Query: a phrase, ./relative or /absolute image path, file:// or http(s) URL,
        /// optionally prefixed with a multiplier such as "2:"
        query: String,

        /// Additional positive query, may be repeated
        #[arg(short, long = "add", value_name = "QUERY")]
        add: Vec<String>,

        /// Negative query, may be repeated
        #[arg(short, long = "subtract", value_name = "QUERY")]
        subtract: Vec<String>,

        /// Number of results to print
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        top: Option<u64>,

        /// Print only file paths, without scores
        #[arg(short, long)]
        filepath_only: bool,

        /// Search the existing index without sweeping the directory first
        #[arg(short, long)]
        no_indexing: bool,

        /// Directory to search (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        #[command(flatten)]
        indexing: IndexingArgs,
    },

    /// Index a directory without searching
    Index {
        /// Directory to index (defaults to the current directory)
        dir: Option<PathBuf>,

        #[command(flatten)]
        indexing: IndexingArgs,
    },

    /// Merge two index databases into a new one
    Merge {
        /// First database
        first: PathBuf,

        /// Second database; a same-path row replaces the first's only when newer
        /// or deleted, so ties keep the first database's row
        second: PathBuf,

        /// Output database
        output: PathBuf,

        /// Overwrite the output if it exists
        #[arg(long)]
        force: bool,

        /// Report what would be merged without writing
        #[arg(long)]
        dry_run: bool,

        /// Only print the version and size of each input
        #[arg(long)]
        check_versions: bool,

        /// Rows written per transaction
        #[arg(long, default_value = "10000", value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags shared by every command that sweeps a directory
#[derive(Args, Debug, Default, Clone)]
pub struct IndexingArgs {
    /// Images embedded per model call
    #[arg(short = 'b', long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub indexing_batch_size: Option<u64>,

    /// Directory name to skip, may be repeated; replaces the configured list
    #[arg(long, value_name = "NAME")]
    pub exclude_dir: Vec<String>,

    /// Also index RAW photos (.arw, .cr2) that have no processed sibling
    #[arg(long)]
    pub experimental_raw_support: bool,

    /// Index database to use instead of the one in the data directory
    #[arg(long, value_name = "FILE")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
