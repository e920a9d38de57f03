//! `histmine watch` - grab after repository updates
//!
//! Watches the git directory and runs an auto-grab whenever `HEAD` or a
//! ref moves (commit, checkout, pull). Auto-grabs run at most once per day
//! and only when `grab_on_vcs_update` is enabled.

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use histmine::config::ConfigStore;
use histmine::grabber::{CancellationToken, GrabLocks, GrabOutcome, HistoryGrabber, NoProgress};
use histmine::storage::repo_name;
use histmine::vcs::VcsAccess;

pub fn run(path: &Path) -> Result<()> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    let git_dir = git2::Repository::discover(&repo_path)
        .with_context(|| format!("No git repository at {}", repo_path.display()))?
        .path()
        .to_path_buf();

    println!(
        "\nWatching {} for updates...\n",
        style(repo_path.display()).cyan()
    );
    let store = ConfigStore::load()?;
    let enabled = store
        .get(&repo_name(&repo_path))
        .is_some_and(|c| c.grab_on_vcs_update);
    if !enabled {
        println!(
            "  {} Grabbing on update is off. Enable it with {}",
            style("[!!]").yellow(),
            style("histmine config set grab_on_vcs_update true").cyan()
        );
    }
    println!("  {} Press Ctrl+C to stop\n", style("→").dim());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .context("Failed to install Ctrl+C handler")?;
    }

    let (tx, rx) = mpsc::channel();
    let mut debouncer = new_debouncer(
        Duration::from_secs(2),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let _ = tx.send(events);
            }
            Err(errors) => {
                for e in errors {
                    warn!("Watch error: {:?}", e);
                }
            }
        },
    )?;
    debouncer.watch(&git_dir, RecursiveMode::Recursive)?;

    let locks = GrabLocks::new();
    let mut workers = vec![spawn_auto_grab(&repo_path, &locks, &cancel)];

    while !cancel.is_cancelled() {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(events) => {
                let moved = events
                    .iter()
                    .flat_map(|event| event.paths.iter())
                    .any(|p| touches_refs(p, &git_dir));
                if !moved {
                    continue;
                }
                debug!("Repository updated, triggering auto-grab");
                workers.retain(|w| !w.is_finished());
                workers.push(spawn_auto_grab(&repo_path, &locks, &cancel));
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    println!("\nStopped watching.");
    Ok(())
}

/// True for `HEAD`, `packed-refs` and anything under `refs/`.
fn touches_refs(path: &Path, git_dir: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(git_dir) else {
        return false;
    };
    relative == Path::new("HEAD")
        || relative == Path::new("packed-refs")
        || relative.starts_with("refs")
}

fn spawn_auto_grab(
    repo_path: &Path,
    locks: &Arc<GrabLocks>,
    cancel: &CancellationToken,
) -> JoinHandle<()> {
    let repo_path: PathBuf = repo_path.to_path_buf();
    let locks = Arc::clone(locks);
    let cancel = cancel.clone();

    std::thread::spawn(move || {
        let result = (|| -> Result<GrabOutcome> {
            let access = VcsAccess::discover(&repo_path);
            let store = ConfigStore::load()?;
            let mut grabber = HistoryGrabber::new(&repo_path, store, locks);
            Ok(grabber.auto_grab(Utc::now(), &access, cancel, &NoProgress)?)
        })();

        match result {
            Ok(GrabOutcome::Done(summary)) => {
                println!("  {} {}", style("[OK]").green(), summary)
            }
            Ok(GrabOutcome::Cancelled(summary)) => {
                println!("  {} Cancelled. {}", style("[--]").yellow(), summary)
            }
            Ok(GrabOutcome::NoVcsRoots) => {
                println!("  {} {}", style("[!!]").yellow(), GrabOutcome::NoVcsRoots)
            }
            Ok(other) => debug!("Auto-grab: {}", other),
            Err(e) => eprintln!("  {} Auto-grab failed: {:#}", style("[!!]").red(), e),
        }
    })
}
