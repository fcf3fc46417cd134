//! Batch results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::Placement;
use crate::models::invoice::{InvoiceRecord, ValidationStatus};
use crate::models::task::{Fingerprint, ProcessingTask, TaskStatus};
use crate::resume::ResumeEntry;

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub record: Option<InvoiceRecord>,
    pub placement: Placement,
    /// Completed in an earlier run and restored from the resume store.
    pub resumed: bool,
    /// The terminal state could not be written to the resume store; a later
    /// run will process the document again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_error: Option<String>,
}

impl TaskOutcome {
    pub fn from_task(task: &ProcessingTask, record: Option<InvoiceRecord>, placement: Placement) -> Self {
        Self {
            path: task.path.clone(),
            fingerprint: task.fingerprint.clone(),
            status: task.status,
            attempts: task.attempt_count,
            last_error: task.last_error.clone(),
            record,
            placement,
            resumed: false,
            checkpoint_error: None,
        }
    }

    /// Outcome restored from a resume entry for the document now found at
    /// `path`. The stored record is re-pointed at `path` as well.
    pub fn resumed_at(entry: ResumeEntry, path: PathBuf) -> Self {
        let mut record = entry.record;
        if let Some(record) = record.as_mut() {
            record.source.path = path.clone();
        }
        Self {
            path,
            fingerprint: entry.fingerprint,
            status: entry.status,
            attempts: entry.attempt_count,
            last_error: entry.last_error,
            record,
            placement: Placement::NotClassified,
            resumed: true,
            checkpoint_error: None,
        }
    }
}

/// Counters over a set of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Never dequeued because the batch was cancelled.
    pub pending: usize,
    pub resumed: usize,
    pub validated: usize,
    pub mismatched: usize,
    pub unvalidated: usize,
    pub placed: usize,
    pub unplaced: usize,
    /// Not filed: missing or short invoice number, or a duplicate invoice.
    pub not_filed: usize,
    /// Finished but missing from the resume store.
    pub unsaved: usize,
}

impl BatchStats {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TaskOutcome>) -> Self {
        let mut stats = BatchStats::default();
        for outcome in outcomes {
            stats.total += 1;
            match outcome.status {
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
                TaskStatus::Pending | TaskStatus::InProgress => stats.pending += 1,
            }
            if outcome.resumed {
                stats.resumed += 1;
            }
            if let Some(record) = &outcome.record {
                match record.validation_status {
                    ValidationStatus::Validated => stats.validated += 1,
                    ValidationStatus::Mismatched => stats.mismatched += 1,
                    ValidationStatus::Unvalidated => stats.unvalidated += 1,
                }
            }
            match outcome.placement {
                Placement::Placed { .. } => stats.placed += 1,
                Placement::Unplaced { .. } => stats.unplaced += 1,
                Placement::Skipped { .. } => stats.not_filed += 1,
                Placement::NotClassified => {}
            }
            if outcome.checkpoint_error.is_some() {
                stats.unsaved += 1;
            }
        }
        stats
    }

    /// Share of tasks that finished `done`.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// Everything a report writer needs after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Name of the strategy that ran.
    pub strategy: String,
    /// Outcomes sorted by source path.
    pub outcomes: Vec<TaskOutcome>,
    pub stats: BatchStats,
    pub cancelled: bool,
}

impl BatchReport {
    /// Records of all completed tasks, in path order.
    pub fn records(&self) -> impl Iterator<Item = &InvoiceRecord> {
        self.outcomes.iter().filter_map(|o| o.record.as_ref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Failed)
    }
}
