//! CLI argument definitions using clap derive

use crate::cache::Layout;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// evalcache - maintain persistent evaluation caches
///
/// Inspects, initializes and clears the directory stores that lazy graphs
/// persist their results in.
#[derive(Parser, Debug)]
#[command(name = "evalcache")]
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
    #[arg(short, long, global = true, env = "EVALCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Store root (overrides config and EVALCACHE_STORE)
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a store at the configured root
    Init(InitArgs),

    /// Show entry count and size of the store
    Stats(StatsArgs),

    /// Remove every entry, keeping the store itself
    Clear(ConfirmArgs),

    /// Remove the store root entirely
    Destroy(ConfirmArgs),

    /// Print the resolved store root
    Path,

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// On-disk layout (defaults to the configured one)
    #[arg(short, long)]
    pub layout: Option<Layout>,
}

/// Arguments for the stats command
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for destructive commands
#[derive(Parser, Debug)]
pub struct ConfirmArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Output format for the stats command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Entry count only
    Plain,
}
