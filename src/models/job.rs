use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Queue-side lifecycle of an evaluation job.
///
/// `Queued` and `Active` are transient; `Completed` and `Failed` are
/// terminal. The queue owns every transition — the orchestrator and the
/// status endpoint only observe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Snapshot of a job's queue record as seen by an observer.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempts: u32,
    pub failed_reason: Option<String>,
}

impl JobHandle {
    /// A handle carrying a terminal failure recorded by an earlier
    /// attempt. Waiting on it would resolve immediately to that stale
    /// failure, so callers re-enqueue instead.
    pub fn is_stale_failure(&self) -> bool {
        self.status == JobStatus::Failed
    }
}
