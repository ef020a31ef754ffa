//! evalcache - persistent evaluation cache maintenance
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use evalcache::cli::commands::{self, StoreTarget};
use evalcache::cli::{Cli, Commands};
use evalcache::config::ConfigManager;
use evalcache::error::EvalResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> EvalResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("evalcache=warn"),
        1 => EnvFilter::new("evalcache=info"),
        _ => EnvFilter::new("evalcache=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load()?;
    let target = StoreTarget::resolve(cli.store.as_deref(), &config);
    debug!("Store root: {}", target.root.display());

    match cli.command {
        Commands::Init(args) => commands::init(args, &target),
        Commands::Stats(args) => commands::stats(args, &target),
        Commands::Clear(args) => commands::clear(args, &target),
        Commands::Destroy(args) => commands::destroy(args, &target),
        Commands::Path => commands::path(&target),
        Commands::Config(args) => commands::config(args, &config, &manager),
    }
}
