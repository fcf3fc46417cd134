//! Durable per-document progress log.
//!
//! The store is a JSON Lines file with one entry per terminal task
//! transition. Loading replays the file and keeps the latest entry per
//! fingerprint, so appending is the only write needed during a run.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::ResumeError;
use crate::models::invoice::InvoiceRecord;
use crate::models::task::{Fingerprint, ProcessingTask, TaskStatus};

/// One line of the progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeEntry {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub status: TaskStatus,
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<InvoiceRecord>,
}

impl ResumeEntry {
    /// Snapshot a task, with the record it produced if any.
    pub fn from_task(task: &ProcessingTask, record: Option<InvoiceRecord>) -> Self {
        Self {
            fingerprint: task.fingerprint.clone(),
            path: task.path.clone(),
            status: task.status,
            attempt_count: task.attempt_count,
            last_error: task.last_error.clone(),
            timestamp: Utc::now(),
            record,
        }
    }
}

/// Append-only progress log keyed by fingerprint.
pub struct ResumeStore {
    path: PathBuf,
    entries: Mutex<HashMap<Fingerprint, ResumeEntry>>,
    writer: tokio::sync::Mutex<File>,
}

impl ResumeStore {
    /// Open the log at `path`, replaying existing entries.
    ///
    /// Missing files start empty. Lines that fail to parse are skipped.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ResumeError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| ResumeError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };
        let entries = replay(&path, &content);

        let mut writer = open_append(&path).await.map_err(io_err)?;
        // A crash mid-write leaves a partial last line; keep the next entry off it.
        if !content.is_empty() && !content.ends_with('\n') {
            writer.write_all(b"\n").await.map_err(io_err)?;
        }

        info!(
            "Loaded {} entries from {}",
            entries.len(),
            path.display()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            writer: tokio::sync::Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct fingerprints recorded.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `fingerprint` was completed in an earlier run.
    pub fn is_done(&self, fingerprint: &Fingerprint) -> bool {
        self.lock_entries()
            .get(fingerprint)
            .is_some_and(|e| e.status == TaskStatus::Done)
    }

    /// Latest entry for `fingerprint`.
    pub fn entry(&self, fingerprint: &Fingerprint) -> Option<ResumeEntry> {
        self.lock_entries().get(fingerprint).cloned()
    }

    /// All latest entries, sorted by path.
    pub fn entries(&self) -> Vec<ResumeEntry> {
        let mut entries: Vec<ResumeEntry> = self.lock_entries().values().cloned().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Latest entries with status `done`, sorted by path.
    pub fn completed(&self) -> Vec<ResumeEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.status == TaskStatus::Done)
            .collect()
    }

    /// Durably append `entry`. Returns once the line is synced to disk.
    pub async fn checkpoint(&self, entry: ResumeEntry) -> Result<(), ResumeError> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            self.write_line(&mut writer, line.as_bytes()).await?;
        }

        debug!(
            "Checkpointed {} as {}",
            entry.fingerprint.short(),
            entry.status
        );
        self.lock_entries().insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    /// Rewrite the log with only the latest entry per fingerprint.
    pub async fn compact(&self) -> Result<usize, ResumeError> {
        let io_err = |source| ResumeError::Io {
            path: self.path.clone(),
            source,
        };

        let mut writer = self.writer.lock().await;
        let entries = self.entries();

        let mut body = String::new();
        for entry in &entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp).await.map_err(io_err)?;
            file.write_all(body.as_bytes()).await.map_err(io_err)?;
            file.sync_all().await.map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        *writer = open_append(&self.path).await.map_err(io_err)?;

        info!(
            "Compacted {} to {} entries",
            self.path.display(),
            entries.len()
        );
        Ok(entries.len())
    }

    /// Swap the append handle for a read-only one so every checkpoint fails.
    #[cfg(test)]
    pub(crate) async fn reject_writes(&self) {
        let read_only = File::open(&self.path).await.unwrap();
        *self.writer.lock().await = read_only;
    }

    async fn write_line(&self, writer: &mut File, line: &[u8]) -> Result<(), ResumeError> {
        let io_err = |source| ResumeError::Io {
            path: self.path.clone(),
            source,
        };
        writer.write_all(line).await.map_err(io_err)?;
        writer.flush().await.map_err(io_err)?;
        writer.sync_data().await.map_err(io_err)?;
        Ok(())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, ResumeEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

fn replay(path: &Path, content: &str) -> HashMap<Fingerprint, ResumeEntry> {
    let mut entries = HashMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ResumeEntry>(line) {
            Ok(entry) => {
                entries.insert(entry.fingerprint.clone(), entry);
            }
            Err(e) => warn!(
                "Skipping corrupt line {} in {}: {}",
                number + 1,
                path.display(),
                e
            ),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentKind;
    use crate::models::invoice::{ExtractionMode, InvoiceFields, SourceRef, ValidationStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn task(name: &str, status: TaskStatus) -> ProcessingTask {
        let mut task = ProcessingTask::new(name, Fingerprint::new(format!("fp-{}", name)));
        task.begin_attempt();
        match status {
            TaskStatus::Done => task.complete(),
            TaskStatus::Failed => task.fail("boom"),
            TaskStatus::Skipped => task.skip("not an invoice"),
            _ => {}
        }
        task
    }

    fn record(task: &ProcessingTask) -> InvoiceRecord {
        let fields = InvoiceFields {
            invoice_number: Some("INV-1".into()),
            ..Default::default()
        };
        InvoiceRecord::new(
            fields,
            ExtractionMode::RegexFallback,
            ValidationStatus::Unvalidated,
            SourceRef {
                path: task.path.clone(),
                fingerprint: task.fingerprint.clone(),
                kind: DocumentKind::Text,
            },
        )
    }

    #[tokio::test]
    async fn test_checkpoint_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.jsonl");

        let done = task("a.pdf", TaskStatus::Done);
        let failed = task("b.pdf", TaskStatus::Failed);
        {
            let store = ResumeStore::open(&path).await.unwrap();
            store
                .checkpoint(ResumeEntry::from_task(&done, Some(record(&done))))
                .await
                .unwrap();
            store
                .checkpoint(ResumeEntry::from_task(&failed, None))
                .await
                .unwrap();
        }

        let store = ResumeStore::open(&path).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.is_done(&done.fingerprint));
        assert!(!store.is_done(&failed.fingerprint));

        let completed = store.completed();
        assert_eq!(completed.len(), 1);
        let restored = completed[0].record.as_ref().unwrap();
        assert_eq!(restored.fields.invoice_number.as_deref(), Some("INV-1"));
        assert_eq!(
            store.entry(&failed.fingerprint).unwrap().last_error.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn test_latest_entry_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.jsonl");

        let store = ResumeStore::open(&path).await.unwrap();
        let failed = task("a.pdf", TaskStatus::Failed);
        let done = task("a.pdf", TaskStatus::Done);
        store.checkpoint(ResumeEntry::from_task(&failed, None)).await.unwrap();
        store.checkpoint(ResumeEntry::from_task(&done, None)).await.unwrap();
        drop(store);

        let store = ResumeStore::open(&path).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.is_done(&done.fingerprint));
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.jsonl");

        let good = serde_json::to_string(&ResumeEntry::from_task(
            &task("a.pdf", TaskStatus::Done),
            None,
        ))
        .unwrap();
        std::fs::write(&path, format!("{}\nnot json\n{{\"fingerprint\": \"trunc", good)).unwrap();

        let store = ResumeStore::open(&path).await.unwrap();
        assert_eq!(store.len(), 1);

        // appending after a truncated tail must not merge into it
        let next = task("b.pdf", TaskStatus::Done);
        store.checkpoint(ResumeEntry::from_task(&next, None)).await.unwrap();
        drop(store);

        let store = ResumeStore::open(&path).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.is_done(&next.fingerprint));
    }

    #[tokio::test]
    async fn test_compact_keeps_latest_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.jsonl");

        let store = ResumeStore::open(&path).await.unwrap();
        for _ in 0..3 {
            store
                .checkpoint(ResumeEntry::from_task(&task("a.pdf", TaskStatus::Failed), None))
                .await
                .unwrap();
        }
        store
            .checkpoint(ResumeEntry::from_task(&task("b.pdf", TaskStatus::Done), None))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);

        assert_eq!(store.compact().await.unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

        // the store keeps appending to the compacted file
        store
            .checkpoint(ResumeEntry::from_task(&task("c.pdf", TaskStatus::Skipped), None))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }
}
