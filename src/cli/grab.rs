//! `histmine grab` - mine history into the event log

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use histmine::config::ConfigStore;
use histmine::grabber::{
    BarProgress, CancellationToken, GrabLocks, GrabOutcome, GrabRequest, HistoryGrabber,
};
use histmine::vcs::VcsAccess;

/// Overrides from the command line. `None` keeps the stored setting.
#[derive(Debug, Default)]
pub struct GrabArgs {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub output: Option<PathBuf>,
    pub track_size: Option<bool>,
}

pub fn run(path: &Path, args: GrabArgs) -> Result<()> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;

    let access = VcsAccess::discover(&repo_path);
    let store = ConfigStore::load()?;
    let mut grabber = HistoryGrabber::new(&repo_path, store, GrabLocks::new());

    let today = Utc::now().date_naive();
    let mut config = grabber.config(today);
    if let Some(from) = args.from {
        config.from = from;
    }
    config.to = args.to.unwrap_or(today);
    if let Some(output) = args.output {
        config.output_file_path = if output.is_absolute() {
            output
        } else {
            std::env::current_dir()?.join(output)
        };
    }
    if let Some(track) = args.track_size {
        config.grab_change_size_in_lines = track;
    }

    let request = GrabRequest::from_config(&config)
        .with_context(|| format!("Invalid range --from {} --to {}", config.from, config.to))?;
    grabber.save_config(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .context("Failed to install Ctrl+C handler")?;
    }

    println!(
        "\nGrabbing {} for {}\n",
        style(request.range).cyan(),
        style(repo_path.display()).cyan()
    );
    let progress = BarProgress::new(ProgressBar::new(BarProgress::TICKS));
    progress.bar().set_style(bar_style());
    progress.bar().set_message("mining commits");

    let outcome = grabber.grab(&request, &access, cancel, &progress);
    progress.bar().finish_and_clear();

    match outcome? {
        GrabOutcome::Done(summary) if summary.had_errors => {
            println!("  {} {}", style("[!!]").yellow(), summary)
        }
        GrabOutcome::Done(summary) => println!("  {} {}", style("[OK]").green(), summary),
        GrabOutcome::Cancelled(summary) => {
            println!("  {} Cancelled. {}", style("[--]").yellow(), summary);
            println!(
                "      Run {} again to continue where it stopped.",
                style("histmine grab").cyan()
            );
        }
        other => println!("  {} {}", style("[--]").dim(), other),
    }
    Ok(())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {elapsed} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
}
