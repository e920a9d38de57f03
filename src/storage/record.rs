//! CSV encoding of change events
//!
//! One record per event, no header row. Quoting follows RFC 4180 so commit
//! messages and paths may contain commas, quotes and newlines.

use chrono::{DateTime, Utc};
use csv::{StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::models::{ChangeEvent, ChangeKind, ChangeSize};

/// On-disk column layout. Field order is the file format.
#[derive(Debug, Serialize, Deserialize)]
struct EventRecord {
    revision: String,
    commit_time: DateTime<Utc>,
    author: String,
    message: String,
    path: String,
    kind: ChangeKind,
    lines_added: Option<u32>,
    lines_removed: Option<u32>,
    previous_path: Option<String>,
}

impl From<&ChangeEvent> for EventRecord {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            revision: event.revision.clone(),
            commit_time: event.commit_time,
            author: event.author.clone(),
            message: event.message.clone(),
            path: event.path.clone(),
            kind: event.kind,
            lines_added: event.size.map(|s| s.added),
            lines_removed: event.size.map(|s| s.removed),
            previous_path: event.previous_path.clone(),
        }
    }
}

impl From<EventRecord> for ChangeEvent {
    fn from(record: EventRecord) -> Self {
        let size = match (record.lines_added, record.lines_removed) {
            (Some(added), Some(removed)) => Some(ChangeSize { added, removed }),
            _ => None,
        };
        Self {
            revision: record.revision,
            commit_time: record.commit_time,
            author: record.author,
            message: record.message,
            path: record.path,
            kind: record.kind,
            size,
            previous_path: record.previous_path,
        }
    }
}

/// Serialize a batch into one buffer so it can be committed with a single write.
pub(crate) fn encode_events(events: &[ChangeEvent]) -> Result<Vec<u8>, StorageError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for event in events {
        writer.serialize(EventRecord::from(event))?;
    }
    writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))
}

/// Parse one stored record back into an event.
pub(crate) fn decode_record(record: &StringRecord) -> Result<ChangeEvent, StorageError> {
    let parsed: EventRecord = record
        .deserialize(None)
        .map_err(|e| StorageError::Parse(e.to_string()))?;
    if parsed.revision.is_empty() || parsed.path.is_empty() {
        return Err(StorageError::Parse(
            "record has an empty revision or path".to_string(),
        ));
    }
    Ok(parsed.into())
}

/// Best-effort text of a record as it appears in the file, for error reports.
pub(crate) fn raw_record(record: &StringRecord) -> String {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if writer.write_record(record).is_err() {
        return record.iter().collect::<Vec<_>>().join(",");
    }
    match writer.into_inner() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim_end().to_string(),
        Err(_) => record.iter().collect::<Vec<_>>().join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use csv::ReaderBuilder;

    fn event(message: &str, path: &str, size: Option<ChangeSize>) -> ChangeEvent {
        ChangeEvent {
            revision: "0f1e2d3c".to_string(),
            commit_time: Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap(),
            author: "Grace Hopper".to_string(),
            message: message.to_string(),
            path: path.to_string(),
            kind: ChangeKind::Modified,
            size,
            previous_path: None,
        }
    }

    fn decode_all(bytes: &[u8]) -> Vec<ChangeEvent> {
        ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes)
            .records()
            .map(|r| decode_record(&r.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_quoting_survives_commas_quotes_and_newlines() {
        let tricky = event(
            "Fix \"parser\", again\n\nLonger body, with commas",
            "dir with, comma/file \"quoted\".txt",
            Some(ChangeSize { added: 10, removed: 2 }),
        );
        let bytes = encode_events(std::slice::from_ref(&tricky)).unwrap();
        assert_eq!(decode_all(&bytes), vec![tricky]);
    }

    #[test]
    fn test_column_order_and_empty_optionals() {
        let bytes = encode_events(&[event("msg", "a.rs", None)]).unwrap();
        let line = String::from_utf8(bytes).unwrap();
        assert_eq!(
            line.trim_end(),
            "0f1e2d3c,2024-01-15T09:30:00Z,Grace Hopper,msg,a.rs,modified,,,"
        );
    }

    #[test]
    fn test_decode_rejects_bad_kind_and_missing_fields() {
        let bad_kind = StringRecord::from(vec![
            "r1", "2024-01-15T09:30:00Z", "a", "m", "p", "exploded", "", "", "",
        ]);
        assert!(matches!(decode_record(&bad_kind), Err(StorageError::Parse(_))));

        let short = StringRecord::from(vec!["r1", "2024-01-15T09:30:00Z"]);
        assert!(matches!(decode_record(&short), Err(StorageError::Parse(_))));

        let bad_time = StringRecord::from(vec![
            "r1", "yesterday", "a", "m", "p", "added", "", "", "",
        ]);
        assert!(decode_record(&bad_time).is_err());
    }

    #[test]
    fn test_raw_record_requotes() {
        let record = StringRecord::from(vec!["a,b", "c"]);
        assert_eq!(raw_record(&record), "\"a,b\",c");
    }
}
