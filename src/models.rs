//! Core data models for histmine
//!
//! A grab turns each VCS commit into a [`MinedCommit`]: the commit metadata
//! plus one [`ChangeEvent`] per touched file. Change events are what the
//! event log stores, one record each.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a file in a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Moved,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Moved => write!(f, "moved"),
        }
    }
}

/// Lines added and removed in one file by one commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSize {
    pub added: u32,
    pub removed: u32,
}

impl ChangeSize {
    pub fn total(&self) -> u32 {
        self.added.saturating_add(self.removed)
    }
}

/// A single file change as reported by a VCS backend, before it is tied to
/// commit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    /// Path before the change, only set for moves
    pub previous_path: Option<String>,
    /// `None` when size tracking is off or the file is binary
    pub size: Option<ChangeSize>,
}

/// One atomic fact about a file changed in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub revision: String,
    pub commit_time: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub path: String,
    pub kind: ChangeKind,
    pub size: Option<ChangeSize>,
    pub previous_path: Option<String>,
}

impl ChangeEvent {
    /// Key used to keep the log free of duplicates.
    pub fn key(&self) -> (String, String) {
        (self.revision.clone(), self.path.clone())
    }
}

/// A VCS commit and the change events extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedCommit {
    pub revision: String,
    pub commit_time: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub events: Vec<ChangeEvent>,
}

impl MinedCommit {
    /// Build a mined commit, stamping each file change with the commit's
    /// metadata. Event order follows `changes`.
    pub fn new(
        revision: impl Into<String>,
        commit_time: DateTime<Utc>,
        author: impl Into<String>,
        message: impl Into<String>,
        changes: Vec<FileChange>,
    ) -> Self {
        let revision = revision.into();
        let author = author.into();
        let message = message.into();
        let events = changes
            .into_iter()
            .map(|change| ChangeEvent {
                revision: revision.clone(),
                commit_time,
                author: author.clone(),
                message: message.clone(),
                path: change.path,
                kind: change.kind,
                size: change.size,
                previous_path: change.previous_path,
            })
            .collect();

        Self {
            revision,
            commit_time,
            author,
            message,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mined_commit_stamps_events() {
        let time = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
        let commit = MinedCommit::new(
            "abc123",
            time,
            "Ada",
            "Rename, then edit",
            vec![
                FileChange {
                    path: "src/new.rs".to_string(),
                    kind: ChangeKind::Moved,
                    previous_path: Some("src/old.rs".to_string()),
                    size: Some(ChangeSize { added: 3, removed: 1 }),
                },
                FileChange {
                    path: "README.md".to_string(),
                    kind: ChangeKind::Modified,
                    previous_path: None,
                    size: None,
                },
            ],
        );

        assert_eq!(commit.events.len(), 2);
        assert!(commit.events.iter().all(|e| e.revision == "abc123"));
        assert!(commit.events.iter().all(|e| e.commit_time == time));
        assert_eq!(commit.events[0].previous_path.as_deref(), Some("src/old.rs"));
        assert_eq!(commit.events[0].size.map(|s| s.total()), Some(4));
        assert_eq!(commit.events[1].key(), ("abc123".to_string(), "README.md".to_string()));
    }

    #[test]
    fn test_change_size_total_saturates() {
        let huge = ChangeSize {
            added: u32::MAX,
            removed: 7,
        };
        assert_eq!(huge.total(), u32::MAX);
        assert_eq!(ChangeSize { added: 2, removed: 3 }.total(), 5);
    }

    #[test]
    fn test_change_kind_display_matches_serde() {
        for kind in [
            ChangeKind::Added,
            ChangeKind::Modified,
            ChangeKind::Deleted,
            ChangeKind::Moved,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }
}
