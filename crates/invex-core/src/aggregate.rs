//! Thread-safe collection of task outcomes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::batch::{BatchReport, BatchStats, TaskOutcome};
use crate::models::invoice::InvoiceRecord;
use crate::models::task::Fingerprint;

type Key = (Fingerprint, PathBuf);

/// Collects outcomes from concurrent workers.
///
/// Outcomes are keyed by fingerprint and path, so an in-run duplicate is
/// listed next to the copy that was processed. Snapshots are sorted by path.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outcomes: Mutex<HashMap<Key, TaskOutcome>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `outcome`, replacing any earlier outcome for the same document.
    pub fn record(&self, outcome: TaskOutcome) {
        let key = (outcome.fingerprint.clone(), outcome.path.clone());
        self.lock().insert(key, outcome);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All outcomes, sorted by source path.
    pub fn snapshot(&self) -> Vec<TaskOutcome> {
        sorted(self.lock().values().cloned().collect())
    }

    /// Records of completed tasks, sorted by source path.
    pub fn records(&self) -> Vec<InvoiceRecord> {
        self.snapshot()
            .into_iter()
            .filter_map(|o| o.record)
            .collect()
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats::from_outcomes(self.lock().values())
    }

    /// Report over the current outcomes.
    pub fn report(&self, strategy: impl Into<String>, cancelled: bool) -> BatchReport {
        build_report(self.snapshot(), strategy.into(), cancelled)
    }

    pub fn into_report(self, strategy: impl Into<String>, cancelled: bool) -> BatchReport {
        let outcomes = self
            .outcomes
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        build_report(
            sorted(outcomes.into_values().collect()),
            strategy.into(),
            cancelled,
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, TaskOutcome>> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn build_report(outcomes: Vec<TaskOutcome>, strategy: String, cancelled: bool) -> BatchReport {
    BatchReport {
        strategy,
        stats: BatchStats::from_outcomes(&outcomes),
        outcomes,
        cancelled,
    }
}

fn sorted(mut outcomes: Vec<TaskOutcome>) -> Vec<TaskOutcome> {
    outcomes.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.fingerprint.cmp(&b.fingerprint)));
    outcomes
}
