//! Git backend using libgit2
//!
//! Lists commits by date range and turns each commit's diff against its
//! first parent into per-file changes.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, Delta, Diff, DiffFindOptions, DiffOptions, ErrorCode, Oid, Patch, Repository, Sort};
use std::path::Path;
use tracing::{debug, warn};

use super::{CommitHeader, MiningError, VcsBackend};
use crate::date_range::DateRange;
use crate::models::{ChangeKind, ChangeSize, FileChange};

/// One git repository (or an initialized submodule of one).
pub struct GitBackend {
    repo: Repository,
    name: String,
    /// Path of a submodule inside its superproject, prefixed to every file
    prefix: Option<String>,
}

impl GitBackend {
    /// Open the git repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .with_context(|| format!("Failed to open git repository at {:?}", path))?;
        debug!("Opened git repository at {:?}", repo.path());
        let name = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .display()
            .to_string();
        Ok(Self {
            repo,
            name,
            prefix: None,
        })
    }

    /// Check if a path is inside a git repository.
    pub fn is_git_repo(path: &Path) -> bool {
        Repository::discover(path).is_ok()
    }

    /// Backends for every initialized submodule. Uninitialized ones are skipped.
    pub fn submodules(&self) -> Vec<GitBackend> {
        let submodules = match self.repo.submodules() {
            Ok(s) => s,
            Err(e) => {
                debug!("Could not list submodules of {}: {}", self.name, e);
                return Vec::new();
            }
        };

        submodules
            .iter()
            .filter_map(|sm| {
                let path = sm.path().to_string_lossy().replace('\\', "/");
                match sm.open() {
                    Ok(repo) => Some(GitBackend {
                        repo,
                        name: format!("{} ({})", self.name, path),
                        prefix: Some(path),
                    }),
                    Err(e) => {
                        debug!("Skipping submodule {}: {}", path, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn prefixed(&self, path: &Path) -> String {
        let path = path.to_string_lossy().replace('\\', "/");
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, path),
            None => path,
        }
    }

    fn header(commit: &Commit) -> CommitHeader {
        let author = commit.author();
        CommitHeader {
            revision: commit.id().to_string(),
            time: commit_time(commit),
            author: author.name().unwrap_or("Unknown").to_string(),
            message: String::from_utf8_lossy(commit.message_bytes())
                .trim_end()
                .to_string(),
        }
    }

    /// Lines added/removed for delta `idx`, `None` for binary files.
    fn change_size(diff: &Diff, idx: usize) -> Result<Option<ChangeSize>, MiningError> {
        let Some(patch) = Patch::from_diff(diff, idx)? else {
            return Ok(None);
        };
        if patch.delta().flags().is_binary() {
            return Ok(None);
        }
        let (_, added, removed) = patch.line_stats()?;
        Ok(Some(ChangeSize {
            added: u32::try_from(added).unwrap_or(u32::MAX),
            removed: u32::try_from(removed).unwrap_or(u32::MAX),
        }))
    }
}

fn commit_time(commit: &Commit) -> DateTime<Utc> {
    Utc.timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_default()
}

impl VcsBackend for GitBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_commits(&self, range: &DateRange) -> Result<Vec<CommitHeader>, MiningError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        if let Err(e) = revwalk.push_head() {
            if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) {
                debug!("{} has no commits yet", self.name);
                return Ok(Vec::new());
            }
            return Err(e.into());
        }

        let mut headers = Vec::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            if !range.contains_time(commit_time(&commit)) {
                continue;
            }
            // Merge commits repeat changes already recorded on their parents
            if commit.parent_count() > 1 {
                debug!("Skipping merge commit {}", commit.id());
                continue;
            }
            headers.push(Self::header(&commit));
        }

        // Walk is newest first; keep parents ahead of children on equal times
        headers.reverse();
        headers.sort_by_key(|h| h.time);
        Ok(headers)
    }

    fn file_changes(
        &self,
        commit: &CommitHeader,
        track_change_size: bool,
    ) -> Result<Vec<FileChange>, MiningError> {
        let commit = self.repo.find_commit(Oid::from_str(&commit.revision)?)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };

        let mut diff_opts = DiffOptions::new();
        diff_opts.ignore_submodules(true);
        let mut diff =
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        let mut changes = Vec::with_capacity(diff.deltas().len());
        for (idx, delta) in diff.deltas().enumerate() {
            let kind = match delta.status() {
                Delta::Added | Delta::Copied => ChangeKind::Added,
                Delta::Deleted => ChangeKind::Deleted,
                Delta::Renamed => ChangeKind::Moved,
                Delta::Modified | Delta::Typechange => ChangeKind::Modified,
                other => {
                    debug!("Ignoring {:?} delta in {}", other, commit.id());
                    continue;
                }
            };

            let file = if kind == ChangeKind::Deleted {
                delta.old_file()
            } else {
                delta.new_file()
            };
            let Some(path) = file.path() else {
                warn!("Delta without a path in {}", commit.id());
                continue;
            };

            let previous_path = if kind == ChangeKind::Moved {
                delta.old_file().path().map(|p| self.prefixed(p))
            } else {
                None
            };

            let size = if track_change_size {
                Self::change_size(&diff, idx)?
            } else {
                None
            };

            changes.push(FileChange {
                path: self.prefixed(path),
                kind,
                previous_path,
                size,
            });
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use git2::{Signature, Time};
    use tempfile::tempdir;

    const JAN_1: i64 = 1_704_067_200; // 2024-01-01T00:00:00Z
    const DAY: i64 = 86_400;

    struct TestRepo {
        dir: tempfile::TempDir,
        repo: Repository,
    }

    impl TestRepo {
        fn new() -> Result<Self> {
            let dir = tempdir()?;
            let repo = Repository::init(dir.path())?;
            Ok(Self { dir, repo })
        }

        /// Write `files` (None deletes) and commit them at `secs`.
        fn commit(&self, secs: i64, message: &str, files: &[(&str, Option<&str>)]) -> Result<Oid> {
            let mut index = self.repo.index()?;
            for (path, content) in files {
                let full = self.dir.path().join(path);
                match content {
                    Some(content) => {
                        if let Some(parent) = full.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(&full, content)?;
                        index.add_path(Path::new(path))?;
                    }
                    None => {
                        std::fs::remove_file(&full)?;
                        index.remove_path(Path::new(path))?;
                    }
                }
            }
            index.write()?;
            let tree = self.repo.find_tree(index.write_tree()?)?;

            let sig = Signature::new("Test User", "test@example.com", &Time::new(secs, 0))?;
            let parent = match self.repo.head() {
                Ok(head) => Some(head.peel_to_commit()?),
                Err(_) => None,
            };
            let parents: Vec<&Commit> = parent.iter().collect();
            Ok(self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?)
        }

        fn backend(&self) -> Result<GitBackend> {
            GitBackend::open(self.dir.path())
        }
    }

    fn january() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_is_git_repo() -> Result<()> {
        let test = TestRepo::new()?;
        assert!(GitBackend::is_git_repo(test.dir.path()));

        let non_repo = tempdir()?;
        assert!(!GitBackend::is_git_repo(non_repo.path()));
        assert!(GitBackend::open(non_repo.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_empty_repo_has_no_commits() -> Result<()> {
        let test = TestRepo::new()?;
        assert!(test.backend()?.list_commits(&january())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_commits_filters_by_day_and_sorts_ascending() -> Result<()> {
        let test = TestRepo::new()?;
        test.commit(JAN_1 - 60, "new year's eve", &[("a.txt", Some("0"))])?;
        test.commit(JAN_1 + 2 * DAY, "second", &[("a.txt", Some("1"))])?;
        test.commit(JAN_1 + 31 * DAY - 1, "last second of january", &[("a.txt", Some("2"))])?;
        test.commit(JAN_1 + 31 * DAY, "february", &[("a.txt", Some("3"))])?;

        let headers = test.backend()?.list_commits(&january())?;
        let messages: Vec<_> = headers.iter().map(|h| h.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "last second of january"]);
        assert!(headers[0].time < headers[1].time);
        assert_eq!(headers[0].author, "Test User");
        assert_eq!(headers[0].revision.len(), 40);
        Ok(())
    }

    #[test]
    fn test_equal_timestamps_keep_parent_first() -> Result<()> {
        let test = TestRepo::new()?;
        test.commit(JAN_1 + DAY, "parent", &[("a.txt", Some("1"))])?;
        test.commit(JAN_1 + DAY, "child", &[("a.txt", Some("2"))])?;

        let headers = test.backend()?.list_commits(&january())?;
        let messages: Vec<_> = headers.iter().map(|h| h.message.as_str()).collect();
        assert_eq!(messages, vec!["parent", "child"]);
        Ok(())
    }

    #[test]
    fn test_file_changes_kinds() -> Result<()> {
        let test = TestRepo::new()?;
        let body = "line one\nline two\nline three\nline four\n";
        test.commit(JAN_1 + DAY, "add", &[("src/a.rs", Some(body)), ("b.txt", Some("b\n"))])?;
        test.commit(JAN_1 + 2 * DAY, "edit", &[("src/a.rs", Some("line one\nline 2\nline three\nline four\nline five\n"))])?;
        test.commit(JAN_1 + 3 * DAY, "delete", &[("b.txt", None)])?;
        test.commit(
            JAN_1 + 4 * DAY,
            "move",
            &[("src/a.rs", None), ("src/moved.rs", Some("line one\nline 2\nline three\nline four\nline five\n"))],
        )?;

        let backend = test.backend()?;
        let headers = backend.list_commits(&january())?;
        assert_eq!(headers.len(), 4);

        let added = backend.file_changes(&headers[0], false)?;
        let mut paths: Vec<_> = added.iter().map(|c| (c.path.as_str(), c.kind)).collect();
        paths.sort_by(|a, b| a.0.cmp(b.0));
        assert_eq!(paths, vec![("b.txt", ChangeKind::Added), ("src/a.rs", ChangeKind::Added)]);
        assert!(added.iter().all(|c| c.size.is_none()));

        let edited = backend.file_changes(&headers[1], true)?;
        assert_eq!(edited.len(), 1);
        assert_eq!(edited[0].kind, ChangeKind::Modified);
        assert_eq!(edited[0].size, Some(ChangeSize { added: 2, removed: 1 }));

        let deleted = backend.file_changes(&headers[2], false)?;
        assert_eq!(deleted[0].path, "b.txt");
        assert_eq!(deleted[0].kind, ChangeKind::Deleted);

        let moved = backend.file_changes(&headers[3], true)?;
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].kind, ChangeKind::Moved);
        assert_eq!(moved[0].path, "src/moved.rs");
        assert_eq!(moved[0].previous_path.as_deref(), Some("src/a.rs"));
        assert_eq!(moved[0].size, Some(ChangeSize { added: 0, removed: 0 }));
        Ok(())
    }

    #[test]
    fn test_binary_files_have_no_size() -> Result<()> {
        let test = TestRepo::new()?;
        test.commit(JAN_1 + DAY, "blob", &[("image.bin", Some("\0\u{1}\u{2}binary\0"))])?;

        let backend = test.backend()?;
        let headers = backend.list_commits(&january())?;
        let changes = backend.file_changes(&headers[0], true)?;
        assert_eq!(changes[0].size, None);
        Ok(())
    }

    #[test]
    fn test_merge_commits_are_skipped() -> Result<()> {
        let test = TestRepo::new()?;
        let base = test.commit(JAN_1 + DAY, "base", &[("a.txt", Some("a"))])?;
        let main = test.commit(JAN_1 + 2 * DAY, "main", &[("a.txt", Some("b"))])?;

        // Side branch from base, then a merge commit with both parents
        let base_commit = test.repo.find_commit(base)?;
        let main_commit = test.repo.find_commit(main)?;
        let sig = Signature::new("Test User", "test@example.com", &Time::new(JAN_1 + 3 * DAY, 0))?;
        let side = test.repo.commit(None, &sig, &sig, "side", &base_commit.tree()?, &[&base_commit])?;
        let side_commit = test.repo.find_commit(side)?;
        test.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            "merge",
            &main_commit.tree()?,
            &[&main_commit, &side_commit],
        )?;

        let headers = test.backend()?.list_commits(&january())?;
        let messages: Vec<_> = headers.iter().map(|h| h.message.as_str()).collect();
        assert_eq!(messages, vec!["base", "main", "side"]);
        Ok(())
    }

    #[test]
    fn test_submodule_prefix() -> Result<()> {
        let test = TestRepo::new()?;
        let mut backend = test.backend()?;
        backend.prefix = Some("vendor/lib".to_string());
        assert_eq!(backend.prefixed(Path::new("src/x.rs")), "vendor/lib/src/x.rs");
        assert!(backend.submodules().is_empty());
        Ok(())
    }
}
