//! Durable dead-letter queue for permanently failed webhook deliveries.
//!
//! JSON Lines, append-only: one record per dead-lettered event, flushed
//! before the write returns so a record survives a crash immediately
//! after. Replay bookkeeping flips `replayed` in place through an atomic
//! full-file rewrite; records are never deleted. The signature header is
//! never stored.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use webhook_codec::{WebhookEvent, EVENT_ID_HEADER};

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("DLQ I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt DLQ record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    pub ts_utc: DateTime<Utc>,
    pub event_id: String,
    pub external_id: String,
    pub url: String,
    pub payload: WebhookEvent,
    /// Headers of the failed delivery, minus the signature.
    pub headers: BTreeMap<String, String>,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub replayed: bool,
    pub replayed_at_utc: Option<DateTime<Utc>>,
}

impl DlqRecord {
    pub fn new(
        url: &str,
        event: &WebhookEvent,
        last_status_code: Option<u16>,
        last_error: Option<String>,
    ) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".into(), "application/json".into());
        headers.insert(EVENT_ID_HEADER.into(), event.event_id.clone());

        DlqRecord {
            ts_utc: Utc::now(),
            event_id: event.event_id.clone(),
            external_id: event.external_id.clone(),
            url: url.into(),
            payload: event.clone(),
            headers,
            last_status_code,
            last_error,
            replayed: false,
            replayed_at_utc: None,
        }
    }
}

pub struct DlqStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DlqStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// Append one record, flushed to disk before returning.
    pub fn append(&self, record: &DlqRecord) -> Result<(), DlqError> {
        let _guard = self.lock.lock().unwrap();

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(serde_json::to_string(record)?.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }

    /// Most recent `limit` records, newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<DlqRecord>, DlqError> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.load_all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    pub fn get_by_event_id(&self, event_id: &str) -> Result<Option<DlqRecord>, DlqError> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.load_all()?.into_iter().find(|r| r.event_id == event_id))
    }

    /// Flip `replayed` for every record carrying this event id. Idempotent:
    /// an already-replayed record keeps its original timestamp. Returns
    /// whether any record matched.
    pub fn mark_replayed(&self, event_id: &str) -> Result<bool, DlqError> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.load_all()?;

        let mut matched = false;
        for record in records.iter_mut().filter(|r| r.event_id == event_id) {
            matched = true;
            if !record.replayed {
                record.replayed = true;
                record.replayed_at_utc = Some(Utc::now());
            }
        }

        if matched {
            self.save_all(&records)?;
        }
        Ok(matched)
    }

    // Callers hold `self.lock`.
    fn load_all(&self) -> Result<Vec<DlqRecord>, DlqError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    // Rewrite through a temp file so a crash mid-rewrite cannot lose
    // previously appended records. Callers hold `self.lock`.
    fn save_all(&self, records: &[DlqRecord]) -> Result<(), DlqError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for record in records {
                file.write_all(serde_json::to_string(record)?.as_bytes())?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn event(event_id: &str) -> WebhookEvent {
        WebhookEvent {
            event_id: event_id.into(),
            external_id: "ext-1".into(),
            value: Decimal::from_str("95.50").unwrap(),
            status: "PAID".into(),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> DlqStore {
        DlqStore::new(dir.path().join("failed_webhooks.jsonl"))
    }

    #[test]
    fn test_append_and_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(&DlqRecord::new("http://r/a", &event("evt_1"), Some(500), None)).unwrap();
        store.append(&DlqRecord::new("http://r/a", &event("evt_2"), Some(503), None)).unwrap();
        store.append(&DlqRecord::new("http://r/a", &event("evt_3"), None, Some("timeout".into()))).unwrap();

        let listed = store.list(2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].event_id, "evt_3");
        assert_eq!(listed[1].event_id, "evt_2");
    }

    #[test]
    fn test_get_by_event_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(&DlqRecord::new("http://r/a", &event("evt_1"), Some(500), None)).unwrap();

        let found = store.get_by_event_id("evt_1").unwrap().unwrap();
        assert_eq!(found.url, "http://r/a");
        assert_eq!(found.last_status_code, Some(500));
        assert!(!found.replayed);

        assert!(store.get_by_event_id("evt_missing").unwrap().is_none());
    }

    #[test]
    fn test_record_never_stores_signature() {
        let record = DlqRecord::new("http://r/a", &event("evt_1"), Some(500), None);
        assert!(!record.headers.contains_key("X-Signature"));

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("X-Signature"));
        assert!(!line.contains("sha256="));
    }

    #[test]
    fn test_mark_replayed_is_idempotent_and_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(&DlqRecord::new("http://r/a", &event("evt_1"), Some(500), None)).unwrap();

        assert!(store.mark_replayed("evt_1").unwrap());
        let first = store.get_by_event_id("evt_1").unwrap().unwrap();
        assert!(first.replayed);
        let stamped = first.replayed_at_utc.unwrap();

        // Second call matches but keeps the original stamp.
        assert!(store.mark_replayed("evt_1").unwrap());
        let second = store.get_by_event_id("evt_1").unwrap().unwrap();
        assert!(second.replayed);
        assert_eq!(second.replayed_at_utc, Some(stamped));

        assert!(!store.mark_replayed("evt_missing").unwrap());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_webhooks.jsonl");

        {
            let store = DlqStore::new(&path);
            store.append(&DlqRecord::new("http://r/a", &event("evt_1"), Some(500), None)).unwrap();
            store.mark_replayed("evt_1").unwrap();
        }

        let reopened = DlqStore::new(&path);
        let record = reopened.get_by_event_id("evt_1").unwrap().unwrap();
        assert!(record.replayed);
        assert_eq!(record.payload, event("evt_1"));
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.list(50).unwrap().is_empty());
    }
}
