//! Store commands - init, inspect and clear directory stores

use super::StoreTarget;
use crate::cache::{CacheBackend, DirCache, StoreStats};
use crate::cli::args::{ConfirmArgs, InitArgs, OutputFormat, StatsArgs};
use crate::error::EvalResult;
use console::style;
use std::io::{self, Write};
use tracing::debug;

/// Create the store, or check an existing one matches the layout
pub fn init(args: InitArgs, target: &StoreTarget) -> EvalResult<()> {
    let layout = args.layout.unwrap_or(target.layout);
    let existed = target.root.is_dir();
    let store = DirCache::with_layout(&target.root, layout)?;

    if existed {
        println!(
            "{} {} store already present at {}",
            style("•").dim(),
            store.layout(),
            store.root().display()
        );
    } else {
        println!(
            "{} Initialized {} store at {}",
            style("✓").green(),
            store.layout(),
            store.root().display()
        );
    }
    Ok(())
}

pub fn stats(args: StatsArgs, target: &StoreTarget) -> EvalResult<()> {
    let Some(store) = target.open_existing()? else {
        println!("No store at {}", target.root.display());
        return Ok(());
    };
    let stats = store.stats()?;

    match args.format {
        OutputFormat::Table => print_stats_table(&stats),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Plain => println!("{}", stats.entries),
    }
    Ok(())
}

fn print_stats_table(stats: &StoreStats) {
    let created = stats
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    println!("{:<10} {}", "ROOT", stats.root.display());
    println!("{:<10} {}", "LAYOUT", stats.layout);
    println!("{:<10} {}", "CREATED", created);
    println!("{:<10} {}", "ENTRIES", stats.entries);
    println!("{:<10} {}", "SIZE", format_bytes(stats.bytes));
}

/// Remove all entries; the root and its marker remain
pub fn clear(args: ConfirmArgs, target: &StoreTarget) -> EvalResult<()> {
    let Some(mut store) = target.open_existing()? else {
        println!("No store at {}", target.root.display());
        return Ok(());
    };

    let count = store.len()?;
    if count == 0 {
        println!("Store is already empty.");
        return Ok(());
    }

    println!(
        "This will remove {} entr{} from {}",
        count,
        if count == 1 { "y" } else { "ies" },
        store.root().display()
    );
    if !args.yes && !confirm()? {
        println!("Aborted.");
        return Ok(());
    }

    store.clear()?;
    println!("{} cleared {} entr{}", style("✓").green(), count, if count == 1 { "y" } else { "ies" });
    Ok(())
}

/// Remove the store root and everything under it
pub fn destroy(args: ConfirmArgs, target: &StoreTarget) -> EvalResult<()> {
    let Some(store) = target.open_existing()? else {
        println!("No store at {}", target.root.display());
        return Ok(());
    };

    println!(
        "This will delete {} and all {} entries",
        store.root().display(),
        store.len()?
    );
    if !args.yes && !confirm()? {
        println!("Aborted.");
        return Ok(());
    }

    let root = store.root().to_path_buf();
    store.destroy()?;
    println!("{} removed {}", style("✓").green(), root.display());
    Ok(())
}

pub fn path(target: &StoreTarget) -> EvalResult<()> {
    println!("{}", target.root.display());
    Ok(())
}

fn confirm() -> EvalResult<bool> {
    print!("Are you sure? [y/N] ");
    let _ = io::stdout().flush();

    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        debug!("Failed to read confirmation: {}", e);
        return Ok(false);
    }
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
