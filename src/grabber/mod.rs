//! History grab orchestration
//!
//! One grab: compute which days of the requested range are not stored
//! yet, mine exactly those, write the commits into the event log in time
//! order, then record the new covered range.
//!
//! ```text
//! request ─► gaps = request − stored ─► VcsAccess::read_mined_commits(gaps)
//!                                            │
//!                   before stored ◄──────────┴──────────► after stored
//!             (batched, prepended once              (appended commit
//!              the range is complete)                 by commit)
//! ```

mod lock;
mod progress;

pub use lock::{GrabGuard, GrabLocks};
pub use progress::{BarProgress, CancellationToken, NoProgress, Progress};

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, GrabberConfig};
use crate::date_range::{DateRange, RangeError};
use crate::models::ChangeEvent;
use crate::storage::{lock_path, repo_name, EventStorage, StorageError};
use crate::vcs::VcsAccess;

/// Failures that abort a grab. Per-commit problems are not errors; they
/// show up as [`GrabSummary::had_errors`].
#[derive(Error, Debug)]
pub enum GrabError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid date range: {0}")]
    Range(#[from] RangeError),

    #[error("config error: {0:#}")]
    Config(anyhow::Error),
}

/// What to grab and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabRequest {
    pub range: DateRange,
    pub output_file: PathBuf,
    pub track_change_size: bool,
}

impl GrabRequest {
    pub fn from_config(config: &GrabberConfig) -> Result<Self, RangeError> {
        Ok(Self {
            range: DateRange::new(config.from, config.to)?,
            output_file: config.output_file_path.clone(),
            track_change_size: config.grab_change_size_in_lines,
        })
    }
}

/// Result of a grab that ran (fully or until cancelled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabSummary {
    /// Commits written during this grab
    pub commits: usize,
    /// Events written during this grab
    pub events: usize,
    pub had_errors: bool,
    /// Days the log covers afterwards
    pub stored_range: Option<DateRange>,
    pub output_file: PathBuf,
}

impl fmt::Display for GrabSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.output_file.display();
        if self.had_errors {
            write!(f, "Grabbed history to {} but there were errors, check logs.", file)?;
        } else if self.events == 0 {
            write!(f, "Grabbed history to {}. No new events were found.", file)?;
        } else {
            write!(f, "Grabbed {} events from {} commits to {}.", self.events, self.commits, file)?;
        }
        if let Some(range) = self.stored_range {
            write!(
                f,
                " It should have history from '{}' to '{}'.",
                range.from(),
                range.to()
            )?;
        }
        Ok(())
    }
}

/// How a grab request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabOutcome {
    Done(GrabSummary),
    /// Stopped early; everything written so far is kept.
    Cancelled(GrabSummary),
    AlreadyInProgress,
    NoVcsRoots,
    /// Auto-grab already ran today.
    SkippedSameDay,
    /// Auto-grab is turned off for this repository.
    Disabled,
}

impl fmt::Display for GrabOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrabOutcome::Done(summary) => write!(f, "{}", summary),
            GrabOutcome::Cancelled(summary) => write!(f, "Grab cancelled. {}", summary),
            GrabOutcome::AlreadyInProgress => write!(f, "Grab is already in progress."),
            GrabOutcome::NoVcsRoots => write!(f, "No version control roots found."),
            GrabOutcome::SkippedSameDay => write!(f, "History was already grabbed today."),
            GrabOutcome::Disabled => write!(f, "Grabbing on VCS update is disabled."),
        }
    }
}

/// Runs grabs for one repository.
pub struct HistoryGrabber {
    repo_name: String,
    repo_path: PathBuf,
    config: ConfigStore,
    locks: Arc<GrabLocks>,
}

impl HistoryGrabber {
    pub fn new(repo_path: &Path, config: ConfigStore, locks: Arc<GrabLocks>) -> Self {
        Self {
            repo_name: repo_name(repo_path),
            repo_path: repo_path.to_path_buf(),
            config,
            locks,
        }
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Settings for this repository as of `today`.
    pub fn config(&self, today: NaiveDate) -> GrabberConfig {
        self.config
            .get_or_default(&self.repo_name, &self.repo_path, today)
    }

    /// Replace and persist the settings for this repository.
    pub fn save_config(&mut self, config: GrabberConfig) -> Result<(), GrabError> {
        self.config.update(&self.repo_name, config);
        self.config.save().map_err(GrabError::Config)
    }

    /// Grab `request` now.
    pub fn grab(
        &mut self,
        request: &GrabRequest,
        access: &VcsAccess,
        cancel: CancellationToken,
        progress: &dyn Progress,
    ) -> Result<GrabOutcome, GrabError> {
        self.grab_at(request, Utc::now(), access, cancel, progress)
    }

    /// Grab triggered by a VCS update: up to `now`'s day, at most once a day,
    /// and only when enabled for this repository.
    pub fn auto_grab(
        &mut self,
        now: DateTime<Utc>,
        access: &VcsAccess,
        cancel: CancellationToken,
        progress: &dyn Progress,
    ) -> Result<GrabOutcome, GrabError> {
        let today = now.date_naive();
        let config = self.config(today);
        if !config.grab_on_vcs_update {
            return Ok(GrabOutcome::Disabled);
        }
        if config.last_grab_time.map(|t| t.date_naive()) == Some(today) {
            debug!("Skipping auto-grab for {}: already grabbed on {}", self.repo_name, today);
            return Ok(GrabOutcome::SkippedSameDay);
        }

        let request = GrabRequest {
            range: DateRange::new(config.from.min(today), today)?,
            output_file: config.output_file_path,
            track_change_size: config.grab_change_size_in_lines,
        };
        self.grab_at(&request, now, access, cancel, progress)
    }

    fn grab_at(
        &mut self,
        request: &GrabRequest,
        now: DateTime<Utc>,
        access: &VcsAccess,
        cancel: CancellationToken,
        progress: &dyn Progress,
    ) -> Result<GrabOutcome, GrabError> {
        let lock_file = lock_path(&request.output_file);
        let Some(_guard) = self
            .locks
            .try_acquire(&self.repo_name, &lock_file)
            .map_err(StorageError::from)?
        else {
            return Ok(GrabOutcome::AlreadyInProgress);
        };
        if access.no_vcs_roots() {
            return Ok(GrabOutcome::NoVcsRoots);
        }
        self.config.reload().map_err(GrabError::Config)?;

        let mut storage = EventStorage::open(&request.output_file)?;
        let stored = storage.stored_range();
        let gaps = plan_gaps(request.range, stored);
        info!(
            "Grabbing {} for {} (stored: {}, gaps: {})",
            request.range,
            self.repo_name,
            stored.map_or_else(|| "nothing".to_string(), |r| r.to_string()),
            gaps.len()
        );

        let mined = if gaps.is_empty() {
            progress.update(1.0);
            Mined::default()
        } else {
            let today = now.date_naive();
            mine_into(&mut storage, &gaps, stored, today, request.track_change_size, access, cancel, progress)?
        };

        storage.set_covered_range(mined.covered.or(stored));
        storage.flush()?;

        let summary = GrabSummary {
            commits: mined.commits,
            events: mined.events,
            had_errors: mined.had_errors,
            stored_range: storage.covered_range(),
            output_file: request.output_file.clone(),
        };
        if mined.cancelled {
            info!("Grab of {} cancelled: {:?}", self.repo_name, summary);
            return Ok(GrabOutcome::Cancelled(summary));
        }

        let mut config = self.config(now.date_naive());
        config.from = request.range.from();
        config.to = request.range.to();
        config.output_file_path = request.output_file.clone();
        config.grab_change_size_in_lines = request.track_change_size;
        config.last_grab_time = Some(now);
        self.save_config(config)?;

        info!("Grab of {} done: {:?}", self.repo_name, summary);
        Ok(GrabOutcome::Done(summary))
    }
}

/// Ranges to mine so that `stored` grows to include `requested`.
///
/// The log only grows at its ends, so a request that neither touches nor
/// overlaps the stored range is widened to span the days in between.
fn plan_gaps(requested: DateRange, stored: Option<DateRange>) -> Vec<DateRange> {
    let Some(stored) = stored else {
        return vec![requested];
    };
    let target = if requested.intersects(&stored) || requested.is_adjacent(&stored) {
        requested
    } else {
        requested.hull(&stored)
    };
    target.subtract(&stored)
}

#[derive(Debug, Default)]
struct Mined {
    commits: usize,
    events: usize,
    had_errors: bool,
    cancelled: bool,
    covered: Option<DateRange>,
}

#[allow(clippy::too_many_arguments)]
fn mine_into(
    storage: &mut EventStorage,
    gaps: &[DateRange],
    stored: Option<DateRange>,
    today: NaiveDate,
    track_change_size: bool,
    access: &VcsAccess,
    cancel: CancellationToken,
    progress: &dyn Progress,
) -> Result<Mined, GrabError> {
    let mut mined = Mined::default();
    let mut head_batch: Vec<ChangeEvent> = Vec::new();
    let mut head_commits = 0;
    let mut last_appended: Option<NaiveDate> = None;

    let mut commits = access.read_mined_commits(gaps, track_change_size, cancel, progress);
    for commit in commits.by_ref() {
        let day = commit.commit_time.date_naive();
        if stored.is_some_and(|s| day < s.from()) {
            head_commits += 1;
            head_batch.extend(commit.events);
            continue;
        }

        match storage.append_to_events_file(&commit.events) {
            Ok(written) => {
                debug!("Appended {} events of {}", written, commit.revision);
                mined.commits += 1;
                mined.events += written;
                last_appended = Some(day);
            }
            Err(StorageError::OutOfOrder(reason)) => {
                warn!("Skipping commit {}: {}", commit.revision, reason);
                mined.had_errors = true;
            }
            Err(e) => return Err(e.into()),
        }
    }

    mined.had_errors |= commits.had_errors();
    mined.cancelled = commits.was_cancelled();
    let finished = commits.finished_ranges().to_vec();

    if !head_batch.is_empty() {
        let head_done = stored.is_some_and(|s| finished.iter().any(|r| r.is_before(&s)));
        if head_done {
            let written = storage.prepend_to_events_file(&head_batch)?;
            mined.commits += head_commits;
            mined.events += written;
        } else {
            info!("Discarding {} unfinished events before the stored range", head_batch.len());
        }
    }

    let mut covered = stored;
    for range in finished.iter().filter_map(|r| settled(*r, today)) {
        covered = Some(covered.map_or(range, |c| c.hull(&range)));
    }

    // Days of an interrupted range up to (not including) the last appended
    // day are complete; that day itself is re-mined next time.
    if let Some(day) = last_appended {
        let partial = gaps
            .iter()
            .find(|g| !finished.contains(g) && g.contains(day));
        if let Some(partial) = partial {
            if let Some(done) = day
                .pred_opt()
                .and_then(|to| DateRange::new(partial.from(), to).ok())
                .and_then(|done| settled(done, today))
            {
                covered = Some(covered.map_or(done, |c| c.hull(&done)));
            }
        }
    }

    mined.covered = covered;
    Ok(mined)
}

/// The part of `range` before `today`. Today and later can still get
/// commits, so they are never recorded as covered.
fn settled(range: DateRange, today: NaiveDate) -> Option<DateRange> {
    let yesterday = today.pred_opt()?;
    DateRange::new(range.from(), range.to().min(yesterday)).ok()
}
