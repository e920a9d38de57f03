//! VCS access for history mining
//!
//! Adapts one or more VCS roots to the mining protocol: given date ranges,
//! produce [`MinedCommit`]s in chronological order, one commit per
//! [`Iterator::next`] call.
//!
//! # Example
//!
//! ```no_run
//! use histmine::date_range::DateRange;
//! use histmine::grabber::{CancellationToken, NoProgress};
//! use histmine::vcs::VcsAccess;
//! use chrono::NaiveDate;
//! use std::path::Path;
//!
//! let access = VcsAccess::discover(Path::new("."));
//! let january = DateRange::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//! ).unwrap();
//! let progress = NoProgress;
//! for commit in access.read_mined_commits(&[january], false, CancellationToken::new(), &progress) {
//!     println!("{} touched {} files", commit.revision, commit.events.len());
//! }
//! ```

pub mod git;

pub use git::GitBackend;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::date_range::DateRange;
use crate::grabber::{CancellationToken, Progress};
use crate::models::{FileChange, MinedCommit};

/// Errors raised by a VCS backend
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("{backend}: {message}")]
    Backend { backend: String, message: String },
}

/// Commit metadata as listed by a backend, before its files are diffed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitHeader {
    pub revision: String,
    pub time: DateTime<Utc>,
    pub author: String,
    pub message: String,
}

/// The narrow contract a VCS client has to satisfy.
pub trait VcsBackend: Send {
    /// Name of this root (for logging)
    fn name(&self) -> &str;

    /// Commits whose timestamp falls in `range`, oldest first.
    fn list_commits(&self, range: &DateRange) -> Result<Vec<CommitHeader>, MiningError>;

    /// Files changed by `commit` relative to its parent revision.
    ///
    /// Line counts are only computed when `track_change_size` is set.
    fn file_changes(
        &self,
        commit: &CommitHeader,
        track_change_size: bool,
    ) -> Result<Vec<FileChange>, MiningError>;
}

/// All VCS roots of one repository.
pub struct VcsAccess {
    roots: Vec<Box<dyn VcsBackend>>,
}

impl VcsAccess {
    pub fn new(roots: Vec<Box<dyn VcsBackend>>) -> Self {
        Self { roots }
    }

    /// Find the git repository containing `path` and its initialized
    /// submodules. A path outside any repository yields no roots.
    pub fn discover(path: &Path) -> Self {
        let mut roots: Vec<Box<dyn VcsBackend>> = Vec::new();
        match GitBackend::open(path) {
            Ok(backend) => {
                for submodule in backend.submodules() {
                    debug!("Found submodule root {}", submodule.name());
                    roots.push(Box::new(submodule));
                }
                roots.insert(0, Box::new(backend));
            }
            Err(e) => debug!("No git root at {}: {}", path.display(), e),
        }
        Self { roots }
    }

    pub fn no_vcs_roots(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn root_names(&self) -> Vec<&str> {
        self.roots.iter().map(|r| r.name()).collect()
    }

    /// Lazily mine `ranges` in the given order.
    pub fn read_mined_commits<'a>(
        &'a self,
        ranges: &[DateRange],
        track_change_size: bool,
        cancel: CancellationToken,
        progress: &'a dyn Progress,
    ) -> MinedCommits<'a> {
        MinedCommits {
            access: self,
            ranges: ranges.to_vec(),
            next_range: 0,
            current: None,
            current_failed: false,
            pending: VecDeque::new(),
            range_total: 0,
            range_done: 0,
            finished: Vec::new(),
            track_change_size,
            cancel,
            progress,
            errors: 0,
            cancelled: false,
        }
    }
}

/// True if `path` is not inside any recognized VCS root.
pub fn no_vcs_roots_in(path: &Path) -> bool {
    !GitBackend::is_git_repo(path)
}

/// Pull-based sequence of mined commits. See [`VcsAccess::read_mined_commits`].
///
/// Failures on individual commits are logged and skipped; check
/// [`had_errors`](Self::had_errors) once iteration ends.
pub struct MinedCommits<'a> {
    access: &'a VcsAccess,
    ranges: Vec<DateRange>,
    next_range: usize,
    current: Option<DateRange>,
    /// Some root could not list the current range
    current_failed: bool,
    pending: VecDeque<(usize, CommitHeader)>,
    range_total: usize,
    range_done: usize,
    finished: Vec<DateRange>,
    track_change_size: bool,
    cancel: CancellationToken,
    progress: &'a dyn Progress,
    errors: usize,
    cancelled: bool,
}

impl MinedCommits<'_> {
    pub fn had_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Ranges whose commits were all produced (or skipped on error).
    ///
    /// A range that some root failed to list is never finished: its
    /// commits are unknown, not absent.
    pub fn finished_ranges(&self) -> &[DateRange] {
        &self.finished
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn start_range(&mut self, range: DateRange) {
        let mut headers = Vec::new();
        let mut failed = false;
        for (idx, root) in self.access.roots.iter().enumerate() {
            match root.list_commits(&range) {
                Ok(listed) => headers.extend(listed.into_iter().map(|h| (idx, h))),
                Err(e) => {
                    self.errors += 1;
                    failed = true;
                    warn!("Failed to list commits of {} in {}: {}", root.name(), range, e);
                }
            }
        }
        // Stable: equal timestamps keep each root's own order.
        headers.sort_by_key(|(_, h)| h.time);
        debug!("Mining {} commits in {}", headers.len(), range);

        self.range_total = headers.len();
        self.range_done = 0;
        self.pending = headers.into();
        self.current = Some(range);
        self.current_failed = failed;
    }

    fn report_progress(&self) {
        let ranges = self.ranges.len().max(1) as f64;
        let within = if self.range_total == 0 {
            1.0
        } else {
            self.range_done as f64 / self.range_total as f64
        };
        let completed = self.next_range.saturating_sub(1) as f64;
        self.progress.update((completed + within) / ranges);
    }
}

impl Iterator for MinedCommits<'_> {
    type Item = MinedCommit;

    fn next(&mut self) -> Option<MinedCommit> {
        loop {
            if self.pending.is_empty() {
                if let Some(range) = self.current.take() {
                    if self.current_failed {
                        debug!("Leaving {} unfinished after a listing failure", range);
                    } else {
                        self.finished.push(range);
                    }
                    self.report_progress();
                }
            }
            if self.cancelled || self.cancel.is_cancelled() {
                self.cancelled = true;
                return None;
            }

            if let Some((idx, header)) = self.pending.pop_front() {
                let root = &self.access.roots[idx];
                let result = root.file_changes(&header, self.track_change_size);
                self.range_done += 1;
                self.report_progress();
                match result {
                    Ok(changes) => {
                        return Some(MinedCommit::new(
                            header.revision,
                            header.time,
                            header.author,
                            header.message,
                            changes,
                        ));
                    }
                    Err(e) => {
                        self.errors += 1;
                        warn!(
                            "Skipping commit {} in {}: {}",
                            header.revision,
                            root.name(),
                            e
                        );
                        continue;
                    }
                }
            }

            let range = *self.ranges.get(self.next_range)?;
            self.next_range += 1;
            self.start_range(range);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::grabber::NoProgress;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn days(from: u32, to: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, from).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, to).unwrap(),
        )
        .unwrap()
    }

    struct Recorder(Mutex<Vec<f64>>);

    impl Progress for Recorder {
        fn update(&self, fraction: f64) {
            self.0.lock().unwrap().push(fraction);
        }
    }

    #[test]
    fn test_commits_follow_range_order_then_time() {
        let access = VcsAccess::new(vec![Box::new(FakeBackend::new(
            "main",
            vec![
                fake_commit("late", at(20, 9), &["a"]),
                fake_commit("early", at(2, 9), &["a"]),
                fake_commit("mid", at(5, 9), &["b"]),
                fake_commit("outside", at(12, 9), &["c"]),
            ],
        ))]);

        let progress = NoProgress;
        let revisions: Vec<_> = access
            .read_mined_commits(
                &[days(1, 10), days(15, 25)],
                false,
                CancellationToken::new(),
                &progress,
            )
            .map(|c| c.revision)
            .collect();
        assert_eq!(revisions, vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_roots_are_merged_by_time() {
        let access = VcsAccess::new(vec![
            Box::new(FakeBackend::new(
                "main",
                vec![fake_commit("m1", at(1, 9), &["a"]), fake_commit("m2", at(3, 9), &["a"])],
            )),
            Box::new(FakeBackend::new(
                "lib",
                vec![fake_commit("s1", at(2, 9), &["lib/x"])],
            )),
        ]);
        assert_eq!(access.root_names(), vec!["main", "lib"]);

        let progress = NoProgress;
        let revisions: Vec<_> = access
            .read_mined_commits(&[days(1, 31)], false, CancellationToken::new(), &progress)
            .map(|c| c.revision)
            .collect();
        assert_eq!(revisions, vec!["m1", "s1", "m2"]);
    }

    #[test]
    fn test_broken_commit_is_skipped_and_flagged() {
        let mut broken = fake_commit("bad", at(2, 9), &["a"]);
        broken.broken = true;
        let access = VcsAccess::new(vec![Box::new(FakeBackend::new(
            "main",
            vec![fake_commit("ok1", at(1, 9), &["a"]), broken, fake_commit("ok2", at(3, 9), &["a"])],
        ))]);

        let progress = NoProgress;
        let mut commits =
            access.read_mined_commits(&[days(1, 31)], true, CancellationToken::new(), &progress);
        let revisions: Vec<_> = commits.by_ref().map(|c| c.revision).collect();
        assert_eq!(revisions, vec!["ok1", "ok2"]);
        assert!(commits.had_errors());
        assert_eq!(commits.error_count(), 1);
        assert_eq!(commits.finished_ranges(), &[days(1, 31)]);
        assert!(!commits.was_cancelled());
    }

    #[test]
    fn test_failed_listing_leaves_range_unfinished() {
        let backend = FakeBackend::new(
            "main",
            vec![fake_commit("c1", at(5, 9), &["a"]), fake_commit("c2", at(20, 9), &["a"])],
        );
        backend.failing_listings.store(1, Ordering::SeqCst);
        let access = VcsAccess::new(vec![Box::new(backend)]);

        let progress = NoProgress;
        let mut commits = access.read_mined_commits(
            &[days(1, 10), days(11, 31)],
            false,
            CancellationToken::new(),
            &progress,
        );
        let revisions: Vec<_> = commits.by_ref().map(|c| c.revision).collect();
        assert_eq!(revisions, vec!["c2"]);
        assert!(commits.had_errors());
        assert_eq!(commits.finished_ranges(), &[days(11, 31)]);
        assert!(!commits.was_cancelled());
    }

    #[test]
    fn test_cancellation_stops_between_commits() {
        let cancel = CancellationToken::new();
        let mut backend = FakeBackend::new(
            "main",
            (1..=5)
                .map(|d| fake_commit(&format!("c{d}"), at(d, 9), &["a"]))
                .collect(),
        );
        backend.cancel_after = Some((2, cancel.clone()));
        let access = VcsAccess::new(vec![Box::new(backend)]);

        let progress = NoProgress;
        let mut commits = access.read_mined_commits(&[days(1, 3), days(4, 31)], false, cancel, &progress);
        let revisions: Vec<_> = commits.by_ref().map(|c| c.revision).collect();
        assert_eq!(revisions, vec!["c1", "c2"]);
        assert!(commits.was_cancelled());
        assert!(!commits.had_errors());
        assert!(commits.finished_ranges().is_empty());
    }

    #[test]
    fn test_size_tracking_is_passed_through() {
        let access = VcsAccess::new(vec![Box::new(FakeBackend::new(
            "main",
            vec![fake_commit("c1", at(1, 9), &["a", "b"])],
        ))]);
        let progress = NoProgress;

        let tracked: Vec<_> = access
            .read_mined_commits(&[days(1, 1)], true, CancellationToken::new(), &progress)
            .collect();
        assert!(tracked[0].events.iter().all(|e| e.size.is_some()));

        let untracked: Vec<_> = access
            .read_mined_commits(&[days(1, 1)], false, CancellationToken::new(), &progress)
            .collect();
        assert!(untracked[0].events.iter().all(|e| e.size.is_none()));
    }

    #[test]
    fn test_progress_reaches_one() {
        let access = VcsAccess::new(vec![Box::new(FakeBackend::new(
            "main",
            vec![fake_commit("c1", at(1, 9), &["a"]), fake_commit("c2", at(20, 9), &["a"])],
        ))]);
        let recorder = Recorder(Mutex::new(Vec::new()));

        let count = access
            .read_mined_commits(
                &[days(1, 10), days(11, 31)],
                false,
                CancellationToken::new(),
                &recorder,
            )
            .count();
        assert_eq!(count, 2);

        let seen = recorder.0.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn test_no_roots() {
        let access = VcsAccess::new(Vec::new());
        assert!(access.no_vcs_roots());

        let dir = tempfile::tempdir().unwrap();
        assert!(no_vcs_roots_in(dir.path()));
        assert!(VcsAccess::discover(dir.path()).no_vcs_roots());
    }
}
