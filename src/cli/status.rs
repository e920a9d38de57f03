//! Status command - show the event log and what it covers

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;
use std::path::Path;

use histmine::config::ConfigStore;
use histmine::grabber::CancellationToken;
use histmine::storage::{repo_name, EventStorage};
use histmine::vcs::no_vcs_roots_in;

/// Run the status command
pub fn run(path: &Path) -> Result<()> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;

    let store = ConfigStore::load()?;
    let name = repo_name(&repo_path);
    let config = store.get_or_default(&name, &repo_path, Utc::now().date_naive());

    println!("\nhistmine status\n");
    println!("  Repository: {}", style(repo_path.display()).cyan());
    println!("  Event log: {}", style(config.output_file_path.display()).dim());
    println!(
        "  Auto-grab on update: {}, change sizes: {}",
        on_off(config.grab_on_vcs_update),
        on_off(config.grab_change_size_in_lines)
    );
    if let Some(last) = config.last_grab_time {
        println!("  Last grab: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    if no_vcs_roots_in(&repo_path) {
        println!("  {} No version control root found", style("[!!]").yellow());
    }

    let storage = EventStorage::open(&config.output_file_path)?;
    if storage.has_no_events() && storage.covered_range().is_none() {
        println!(
            "  {} No history grabbed yet. Run {}",
            style("[--]").dim(),
            style("histmine grab").cyan()
        );
        println!();
        return Ok(());
    }

    let mut malformed = 0usize;
    let readable = storage
        .read_all_events(CancellationToken::new(), |_, _| malformed += 1)?
        .count();

    match storage.covered_range() {
        Some(range) => println!(
            "  {} Covers {} to {}",
            style("[OK]").green(),
            style(range.from()).cyan(),
            style(range.to()).cyan()
        ),
        None => println!("  {} Covered range not recorded", style("[--]").dim()),
    }
    println!("      {} events", style(readable).cyan());
    if let (Some(first), Some(last)) = (storage.first_event(), storage.last_event()) {
        println!(
            "      first: {} {} ({})",
            first.commit_time.format("%Y-%m-%d"),
            first.path,
            short(&first.revision)
        );
        println!(
            "      last:  {} {} ({})",
            last.commit_time.format("%Y-%m-%d"),
            last.path,
            short(&last.revision)
        );
    }
    if malformed > 0 {
        println!(
            "  {} {} malformed records are skipped when reading",
            style("[!!]").yellow(),
            malformed
        );
    }
    println!();
    Ok(())
}

fn on_off(flag: bool) -> console::StyledObject<&'static str> {
    if flag {
        style("on").green()
    } else {
        style("off").dim()
    }
}

fn short(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}
