//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and maintain a cursor registry
#[derive(Parser, Debug)]
#[command(name = "cursor-registry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Registry configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Registry directory, overrides the configured path
    #[arg(long, global = true)]
    pub path: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the persisted records of a store
    Dump {
        /// Store name (directory under the registry path)
        #[arg(long)]
        store: String,

        /// Only print keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Replay a change log and print cursor changes
    Tail {
        /// Path to a log.json file
        #[arg(long)]
        file: PathBuf,

        /// Keep polling for new lines until interrupted
        #[arg(long)]
        follow: bool,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Run one garbage collection pass over a store
    Gc {
        /// Store name
        #[arg(long)]
        store: String,

        /// Key prefix owned by the store (without the trailing separator)
        #[arg(long)]
        prefix: String,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dump() {
        let cli = Cli::parse_from([
            "cursor-registry",
            "--path",
            "/tmp/reg",
            "dump",
            "--store",
            "filebeat",
            "--prefix",
            "filestream",
        ]);
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/reg")));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Dump { ref store, prefix: Some(ref p) } if store == "filebeat" && p == "filestream"
        ));
    }

    #[test]
    fn test_parse_tail_with_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "cursor-registry",
            "tail",
            "--file",
            "log.json",
            "--follow",
            "-f",
            "pretty",
            "-v",
        ]);
        assert_eq!(cli.format, OutputFormat::Pretty);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Tail { follow: true, interval_ms: 1000, .. }
        ));
    }

    #[test]
    fn test_gc_requires_prefix() {
        let result = Cli::try_parse_from(["cursor-registry", "gc", "--store", "filebeat"]);
        assert!(result.is_err());
    }
}
