//! CLI argument definitions using clap derive

use crate::hash::HashAlgorithm;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// objstash - compiler output cache
///
/// Maintenance front end for the local cache directory: statistics,
/// cleanup, inspection and configuration.
#[derive(Parser, Debug)]
#[command(name = "objstash")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "OBJSTASH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show hit/miss counters and cache size
    Stats {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Reset the hit/miss counters
    ZeroStats,

    /// Trim the cache to its configured size and file limits
    Cleanup,

    /// Remove entries not used within DURATION (e.g. 30d, 3600s)
    EvictOlderThan {
        duration: String,
    },

    /// Remove every cache entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the digest of a file, or of stdin with "-"
    HashFile {
        path: String,

        /// Digest algorithm (default: from config)
        #[arg(short, long)]
        algorithm: Option<HashAlgorithmArg>,
    },

    /// Print a stored manifest in readable form
    DumpManifest {
        path: PathBuf,
    },

    /// Show how stored results are compressed
    ShowCompression {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Re-encode every stored result at LEVEL (zstd level or "uncompressed")
    Recompress {
        #[arg(allow_negative_numbers = true)]
        level: String,
    },

    /// Decode a stored result file
    ExtractResult {
        path: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Print a shell completion script
    Completions {
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., cache.max_size)
        key: String,
        /// Value to set
        value: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HashAlgorithmArg {
    Xxh3,
    Sha256,
}

impl From<HashAlgorithmArg> for HashAlgorithm {
    fn from(arg: HashAlgorithmArg) -> Self {
        match arg {
            HashAlgorithmArg::Xxh3 => HashAlgorithm::Xxh3,
            HashAlgorithmArg::Sha256 => HashAlgorithm::Sha256,
        }
    }
}
