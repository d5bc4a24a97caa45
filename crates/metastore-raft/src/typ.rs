//! Raft type configuration for the metastore.
//!
//! Defines the `TypeConfig` that wires together all openraft
//! associated types: node IDs, request/response payloads, and
//! the async runtime.

use std::io::Cursor;

use metastore_state::{AssignedCompactionJob, CompactionJobPlan, CompactionJobStatusUpdate};
use openraft::TokioRuntime;

/// Client write request submitted to the Raft cluster.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    /// Unix nanoseconds, stamped by the leader when the entry is proposed.
    /// Used as the scheduling clock on every replica.
    pub appended_at: i64,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Command {
    /// A compaction worker reports progress and asks for more work.
    PollCompactionJobs(PollCompactionJobsRequest),
    /// The compaction planner submits new jobs.
    AddCompactionJobs(AddCompactionJobsRequest),
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PollCompactionJobsRequest {
    pub status_updates: Vec<CompactionJobStatusUpdate>,
    /// Free job slots on the worker.
    pub assign_jobs_max: u32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AddCompactionJobsRequest {
    pub plans: Vec<CompactionJobPlan>,
}

/// Response returned after a write is applied to the state machine.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    /// Jobs handed to the polling worker.
    pub assigned_jobs: Vec<AssignedCompactionJob>,
    /// Reported jobs the worker no longer owns and must stop.
    pub revoked_jobs: Vec<String>,
    /// Planned jobs refused by admission control.
    pub rejected_jobs: Vec<String>,
}

openraft::declare_raft_types!(
    /// Metastore Raft type configuration.
    pub TypeConfig:
        D = Request,
        R = Response,
        NodeId = u64,
        Node = openraft::BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = TokioRuntime,
);

/// Convenience alias for the Raft instance.
pub type MetastoreRaft = openraft::Raft<TypeConfig>;
