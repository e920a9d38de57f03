//! Sidecar metadata for an event log
//!
//! Records which days the log is known to cover. Event timestamps alone
//! cannot tell "grabbed, but nobody committed" apart from "never grabbed".

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::StorageError;
use crate::date_range::DateRange;

const META_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StorageMeta {
    pub version: u32,
    pub covered: Option<DateRange>,
}

/// `events.csv` -> `events.csv.meta.json`
pub(crate) fn meta_path(events_path: &Path) -> PathBuf {
    let mut name = events_path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Load the sidecar. A missing file is `Ok(None)`.
pub(crate) fn load(events_path: &Path) -> Result<Option<StorageMeta>, StorageError> {
    let path = meta_path(events_path);
    if !path.exists() {
        return Ok(None);
    }

    let reader = BufReader::new(File::open(&path)?);
    let meta: StorageMeta = serde_json::from_reader(reader)?;
    if meta.version != META_VERSION {
        info!(
            "Ignoring {} (version {}, expected {})",
            path.display(),
            meta.version,
            META_VERSION
        );
        return Ok(None);
    }
    debug!("Loaded storage meta from {}: {:?}", path.display(), meta.covered);
    Ok(Some(meta))
}

/// Persist the sidecar via temp file and rename.
pub(crate) fn save(events_path: &Path, covered: Option<DateRange>) -> Result<(), StorageError> {
    let path = meta_path(events_path);
    let tmp_path = path.with_extension("tmp");
    let meta = StorageMeta {
        version: META_VERSION,
        covered,
    };

    let result = (|| -> Result<(), StorageError> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, &meta)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn test_meta_path_appends_suffix() {
        assert_eq!(
            meta_path(Path::new("/data/repo-file-events.csv")),
            PathBuf::from("/data/repo-file-events.csv.meta.json")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("events.csv");
        assert_eq!(load(&events).unwrap(), None);

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        save(&events, Some(range)).unwrap();

        let meta = load(&events).unwrap().unwrap();
        assert_eq!(meta.covered, Some(range));
        assert!(!meta_path(&events).with_extension("tmp").exists());
    }

    #[test]
    fn test_unknown_version_is_ignored() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("events.csv");
        fs::write(meta_path(&events), r#"{"version": 99, "covered": null}"#).unwrap();
        assert_eq!(load(&events).unwrap(), None);
    }

    #[test]
    fn test_corrupt_meta_is_an_error() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("events.csv");
        fs::write(meta_path(&events), "{ not json").unwrap();
        assert!(matches!(load(&events), Err(StorageError::Json(_))));
    }
}
