//! Domain types for compaction job scheduling.
//!
//! A job is described by two independent records: the immutable
//! [`CompactionJobPlan`] (what to compact) and the mutable
//! [`CompactionJobState`] (who owns it and until when). Both are stored
//! under the job name. Timestamps are unix nanoseconds taken from the
//! replicated log, never from a local clock.

use serde::{Deserialize, Serialize};

/// Unique name of a compaction job.
pub type JobName = String;

// ── Plan ──────────────────────────────────────────────────────────

/// Immutable description of one compaction job.
///
/// Created once on admission and deleted when the job completes or is
/// evicted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionJobPlan {
    pub name: JobName,
    pub compaction_level: u32,
    /// Tenant the source blocks belong to.
    #[serde(default)]
    pub tenant: String,
    /// Shard the source blocks belong to.
    #[serde(default)]
    pub shard: u32,
    /// Block IDs to be merged by the worker.
    #[serde(default)]
    pub source_blocks: Vec<String>,
}

impl CompactionJobPlan {
    /// A plan with no tenant/shard/block payload.
    pub fn new(name: impl Into<String>, compaction_level: u32) -> Self {
        Self {
            name: name.into(),
            compaction_level,
            tenant: String::new(),
            shard: 0,
            source_blocks: Vec::new(),
        }
    }
}

// ── State ─────────────────────────────────────────────────────────

/// Lifecycle status of a compaction job.
///
/// The declaration order is the priority order within a queue level:
/// jobs that were never assigned sort first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CompactionJobStatus {
    #[default]
    Unspecified,
    InProgress,
    Success,
}

impl std::fmt::Display for CompactionJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionJobStatus::Unspecified => write!(f, "unspecified"),
            CompactionJobStatus::InProgress => write!(f, "in_progress"),
            CompactionJobStatus::Success => write!(f, "success"),
        }
    }
}

/// Mutable scheduling state of a compaction job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionJobState {
    pub name: JobName,
    pub compaction_level: u32,
    pub status: CompactionJobStatus,
    /// Log index of the entry that made the latest assignment.
    pub token: u64,
    /// Unix nanoseconds after which an in-progress job is abandoned.
    pub lease_expires_at: i64,
    /// Unix nanoseconds of the entry that admitted the job.
    pub added_at: i64,
    /// Number of assignments that were abandoned by their worker.
    pub failures: u32,
}

// ── Messages ──────────────────────────────────────────────────────

/// Progress report sent by a compaction worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionJobStatusUpdate {
    pub name: JobName,
    /// Token the worker received with its assignment.
    pub token: u64,
    pub status: CompactionJobStatus,
}

/// A job handed out to a worker: its new state together with the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignedCompactionJob {
    pub state: CompactionJobState,
    pub plan: CompactionJobPlan,
}

/// A job admitted to the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCompactionJob {
    pub state: CompactionJobState,
    pub plan: CompactionJobPlan,
}

/// The committed diff produced by one schedule.
///
/// Applied atomically to the job store and the live queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionPlanUpdate {
    pub new_jobs: Vec<NewCompactionJob>,
    pub assigned_jobs: Vec<AssignedCompactionJob>,
    pub updated_jobs: Vec<CompactionJobState>,
    pub completed_jobs: Vec<CompactionJobState>,
    pub evicted_jobs: Vec<CompactionJobState>,
}

impl CompactionPlanUpdate {
    pub fn is_empty(&self) -> bool {
        self.new_jobs.is_empty()
            && self.assigned_jobs.is_empty()
            && self.updated_jobs.is_empty()
            && self.completed_jobs.is_empty()
            && self.evicted_jobs.is_empty()
    }

    /// Merge another update into this one, preserving order.
    pub fn extend(&mut self, other: CompactionPlanUpdate) {
        self.new_jobs.extend(other.new_jobs);
        self.assigned_jobs.extend(other.assigned_jobs);
        self.updated_jobs.extend(other.updated_jobs);
        self.completed_jobs.extend(other.completed_jobs);
        self.evicted_jobs.extend(other.evicted_jobs);
    }
}
