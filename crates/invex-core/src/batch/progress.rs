//! Progress callbacks for batch runs.

use std::path::Path;

use super::report::{BatchStats, TaskOutcome};

/// Observer of a batch run. All methods default to no-ops.
///
/// Called from worker tasks, so implementations must be cheap and thread-safe.
pub trait BatchProgress: Send + Sync {
    fn batch_started(&self, _total: usize) {}

    fn task_started(&self, _path: &Path) {}

    fn task_finished(&self, _outcome: &TaskOutcome) {}

    fn batch_completed(&self, _stats: &BatchStats) {}
}

/// Progress observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl BatchProgress for NoProgress {}
