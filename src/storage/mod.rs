//! Append-only event log
//!
//! Stores [`ChangeEvent`]s as CSV records ordered by commit time. The log
//! grows at either end: newer history is appended in place, older history is
//! prepended by rewriting the file through a temp file and an atomic rename,
//! so readers see either the old file or the new one and never a mix.
//!
//! ```text
//! older gap            stored span             newer gap
//! ─────────┐   ┌──────────────────────────┐   ┌─────────
//!  prepend │──►│ first ... events ... last│◄──│ append
//! ─────────┘   └──────────────────────────┘   └─────────
//! ```
//!
//! A sidecar (`<file>.meta.json`) remembers the days the log covers, which
//! is what gap computation works against.

mod meta;
pub mod paths;
mod record;

pub use paths::{default_events_path, get_data_dir, repo_name};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecordsIntoIter};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::date_range::{date_range_between, DateRange};
use crate::grabber::CancellationToken;
use crate::models::ChangeEvent;

/// Errors that can occur in storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed event record: {0}")]
    Parse(String),

    #[error("Events out of order: {0}")]
    OutOfOrder(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

type EventKey = (String, String);

/// A single event log file plus cached boundary state.
pub struct EventStorage {
    path: PathBuf,
    first: Option<ChangeEvent>,
    last: Option<ChangeEvent>,
    count: usize,
    /// Keys of events stored on the first day
    head_keys: HashSet<EventKey>,
    /// Keys of events stored on the last day
    tail_keys: HashSet<EventKey>,
    has_meta: bool,
    covered: Option<DateRange>,
    meta_dirty: bool,
    appender: Option<File>,
}

impl EventStorage {
    /// Open a log, scanning it once to seed the cached boundaries.
    ///
    /// The file is not created until the first write.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let mut storage = Self {
            path,
            first: None,
            last: None,
            count: 0,
            head_keys: HashSet::new(),
            tail_keys: HashSet::new(),
            has_meta: false,
            covered: None,
            meta_dirty: false,
            appender: None,
        };

        if let Some(meta) = meta::load(&storage.path)? {
            storage.has_meta = true;
            storage.covered = meta.covered;
        }

        let mut malformed = 0usize;
        let reader = storage.read_all_events(CancellationToken::new(), |raw, err| {
            malformed += 1;
            warn!("Skipping malformed record ({}): {}", err, raw);
        })?;
        for event in reader {
            storage.note_appended(&event);
        }

        debug!(
            "Opened {} ({} events, {} malformed, covered {:?})",
            storage.path.display(),
            storage.count,
            malformed,
            storage.covered
        );
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream every record in file order.
    ///
    /// Malformed records are passed to `on_parse_error` with their raw text
    /// and skipped. Iteration stops quietly once `cancel` is set; events
    /// already yielded are valid.
    pub fn read_all_events<F>(
        &self,
        cancel: CancellationToken,
        on_parse_error: F,
    ) -> StorageResult<EventReader<F>>
    where
        F: FnMut(&str, &StorageError),
    {
        let records = if self.path.exists() {
            let reader = ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&self.path)?;
            Some(reader.into_records())
        } else {
            None
        };

        Ok(EventReader {
            records,
            cancel,
            on_parse_error,
        })
    }

    pub fn first_event(&self) -> Option<&ChangeEvent> {
        self.first.as_ref()
    }

    pub fn last_event(&self) -> Option<&ChangeEvent> {
        self.last.as_ref()
    }

    pub fn has_no_events(&self) -> bool {
        self.count == 0
    }

    pub fn event_count(&self) -> usize {
        self.count
    }

    /// Days the log is recorded to cover, if a sidecar exists.
    pub fn covered_range(&self) -> Option<DateRange> {
        self.covered
    }

    /// Record the covered days. Persisted on the next [`flush`](Self::flush).
    pub fn set_covered_range(&mut self, range: Option<DateRange>) {
        if self.covered != range || !self.has_meta {
            self.covered = range;
            self.has_meta = true;
            self.meta_dirty = true;
        }
    }

    /// Stored span used for gap computation.
    ///
    /// Prefers the recorded covered range; logs without a sidecar fall back
    /// to the days of the first and last stored events.
    pub fn stored_range(&self) -> Option<DateRange> {
        if self.has_meta {
            return self.covered;
        }
        date_range_between(
            self.first.as_ref().map(|e| e.commit_time),
            self.last.as_ref().map(|e| e.commit_time),
        )
        .ok()
        .flatten()
    }

    /// Write `batch` after the current tail.
    ///
    /// Events already stored on the last day are dropped. Returns how many
    /// events were written. On failure the file is truncated back to its
    /// previous length.
    pub fn append_to_events_file(&mut self, batch: &[ChangeEvent]) -> StorageResult<usize> {
        self.append_using(batch, |file, bytes| file.write_all(bytes))
    }

    /// Write `batch` before the current head.
    ///
    /// The new file is assembled next to the old one and renamed over it.
    /// Events already stored on the first day are dropped.
    pub fn prepend_to_events_file(&mut self, batch: &[ChangeEvent]) -> StorageResult<usize> {
        self.prepend_using(batch, |tmp| Ok(BufWriter::new(File::create(tmp)?)))
    }

    /// Make every write issued so far durable, including the covered range.
    pub fn flush(&mut self) -> StorageResult<()> {
        if let Some(file) = &self.appender {
            file.sync_data()?;
        }
        if self.meta_dirty {
            self.ensure_parent_dir()?;
            meta::save(&self.path, self.covered)?;
            self.meta_dirty = false;
        }
        Ok(())
    }

    fn append_using<A>(&mut self, batch: &[ChangeEvent], write: A) -> StorageResult<usize>
    where
        A: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        let fresh: Vec<ChangeEvent> = batch
            .iter()
            .filter(|e| !self.tail_keys.contains(&e.key()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        check_sorted(&fresh)?;
        if let (Some(last), Some(head)) = (&self.last, fresh.first()) {
            if head.commit_time < last.commit_time {
                return Err(StorageError::OutOfOrder(format!(
                    "{} ({}) is older than the stored tail ({})",
                    head.revision, head.commit_time, last.commit_time
                )));
            }
        }

        let bytes = record::encode_events(&fresh)?;
        let file = self.appender()?;
        let previous_len = file.metadata()?.len();
        if let Err(e) = write(file, &bytes) {
            if let Err(truncate_err) = file.set_len(previous_len) {
                warn!(
                    "Failed to roll back partial append to {}: {}",
                    self.path.display(),
                    truncate_err
                );
            }
            return Err(e.into());
        }

        for event in &fresh {
            self.note_appended(event);
        }
        Ok(fresh.len())
    }

    fn prepend_using<W, C>(&mut self, batch: &[ChangeEvent], create_tmp: C) -> StorageResult<usize>
    where
        W: DurableWrite,
        C: FnOnce(&Path) -> io::Result<W>,
    {
        if self.has_no_events() {
            return self.append_to_events_file(batch);
        }

        let fresh: Vec<ChangeEvent> = batch
            .iter()
            .filter(|e| !self.head_keys.contains(&e.key()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        check_sorted(&fresh)?;
        if let (Some(first), Some(tail)) = (&self.first, fresh.last()) {
            if tail.commit_time > first.commit_time {
                return Err(StorageError::OutOfOrder(format!(
                    "{} ({}) is newer than the stored head ({})",
                    tail.revision, tail.commit_time, first.commit_time
                )));
            }
        }

        let head = record::encode_events(&fresh)?;
        let tmp_path = tmp_path(&self.path);

        // The appender points at the inode about to be replaced.
        self.appender = None;

        let result = (|| -> StorageResult<()> {
            let mut out = create_tmp(&tmp_path)?;
            out.write_all(&head)?;
            if self.path.exists() {
                let mut existing = File::open(&self.path)?;
                io::copy(&mut existing, &mut out)?;
            }
            out.sync()?;
            drop(out);
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        if let Err(e) = result {
            if tmp_path.exists() {
                if let Err(remove_err) = fs::remove_file(&tmp_path) {
                    warn!("Failed to remove {}: {}", tmp_path.display(), remove_err);
                }
            }
            return Err(e);
        }

        self.note_prepended(&fresh);
        Ok(fresh.len())
    }

    fn appender(&mut self) -> StorageResult<&mut File> {
        let file = match self.appender.take() {
            Some(file) => file,
            None => {
                self.ensure_parent_dir()?;
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        Ok(self.appender.insert(file))
    }

    fn ensure_parent_dir(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    fn note_appended(&mut self, event: &ChangeEvent) {
        let day = event.commit_time.date_naive();
        if self.first.is_none() {
            self.first = Some(event.clone());
        }
        if self.first_day() == Some(day) {
            self.head_keys.insert(event.key());
        }
        if self.last_day() != Some(day) {
            self.tail_keys.clear();
        }
        self.tail_keys.insert(event.key());
        self.last = Some(event.clone());
        self.count += 1;
    }

    fn note_prepended(&mut self, batch: &[ChangeEvent]) {
        let Some(new_first) = batch.first() else {
            return;
        };
        let new_day = new_first.commit_time.date_naive();
        if self.first_day() != Some(new_day) {
            self.head_keys.clear();
        }
        // Only a log that sits on a single day can get tail-day events here
        let tail_day = self.last_day();
        for event in batch {
            let day = event.commit_time.date_naive();
            if day == new_day {
                self.head_keys.insert(event.key());
            }
            if Some(day) == tail_day {
                self.tail_keys.insert(event.key());
            }
        }
        self.first = Some(new_first.clone());
        self.count += batch.len();
    }

    fn first_day(&self) -> Option<NaiveDate> {
        self.first.as_ref().map(|e| e.commit_time.date_naive())
    }

    fn last_day(&self) -> Option<NaiveDate> {
        self.last.as_ref().map(|e| e.commit_time.date_naive())
    }
}

/// Lazy reader over a log file. See [`EventStorage::read_all_events`].
pub struct EventReader<F> {
    records: Option<StringRecordsIntoIter<File>>,
    cancel: CancellationToken,
    on_parse_error: F,
}

impl<F> Iterator for EventReader<F>
where
    F: FnMut(&str, &StorageError),
{
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            if self.cancel.is_cancelled() {
                self.records = None;
                return None;
            }
            let records = self.records.as_mut()?;
            match records.next()? {
                Ok(record) => match record::decode_record(&record) {
                    Ok(event) => return Some(event),
                    Err(e) => (self.on_parse_error)(&record::raw_record(&record), &e),
                },
                Err(e) => {
                    let fatal = e.is_io_error();
                    let line = e
                        .position()
                        .map(|p| format!("<unreadable record at line {}>", p.line()))
                        .unwrap_or_else(|| "<unreadable record>".to_string());
                    (self.on_parse_error)(&line, &StorageError::Csv(e));
                    if fatal {
                        self.records = None;
                        return None;
                    }
                }
            }
        }
    }
}

/// Writer for the prepend temp file that can be made durable.
trait DurableWrite: Write {
    fn sync(&mut self) -> io::Result<()>;
}

impl DurableWrite for BufWriter<File> {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_ref().sync_all()
    }
}

/// `events.csv` -> `events.csv.lock`, held while a grab writes the log.
pub fn lock_path(events_path: &Path) -> PathBuf {
    let mut name = events_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn check_sorted(batch: &[ChangeEvent]) -> StorageResult<()> {
    match batch
        .windows(2)
        .find(|w| w[1].commit_time < w[0].commit_time)
    {
        Some(w) => Err(StorageError::OutOfOrder(format!(
            "{} ({}) follows {} ({}) in the batch",
            w[1].revision, w[1].commit_time, w[0].revision, w[0].commit_time
        ))),
        None => Ok(()),
    }
}
