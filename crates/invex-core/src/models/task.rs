//! Processing task model and document fingerprints.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Stable identity of a document, derived from its content.
///
/// Normally the hex SHA-256 of the file bytes. When the content cannot be
/// read a composite `path+size+mtime` digest is used instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a processing task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Whether the status is final for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work for one document. Mutated only by the worker holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl ProcessingTask {
    pub fn new(path: impl AsRef<Path>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fingerprint,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Mark the start of a new attempt.
    pub fn begin_attempt(&mut self) {
        self.status = TaskStatus::InProgress;
        self.attempt_count += 1;
    }

    /// Return to the queue after a transient failure.
    pub fn requeue(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Pending;
        self.last_error = Some(error.into());
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Done;
        self.last_error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Skipped;
        self.last_error = Some(reason.into());
    }
}
