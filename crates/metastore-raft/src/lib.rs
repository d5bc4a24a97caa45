// openraft's StorageError is large; allowed crate-wide.
#![allow(clippy::result_large_err)]

//! Metastore Raft state machine — openraft + redb.
//!
//! Every committed entry is applied in one redb write transaction: the
//! command handler runs a compaction [`Schedule`](metastore_scheduler::Schedule)
//! bound to the entry's index and timestamp, the resulting plan update is
//! persisted and applied to the scheduler, and the applied log id is saved
//! alongside it.
//!
//! # Architecture
//!
//! - **`typ`** — Type configuration (`TypeConfig`, `Request`, `Response`)
//! - **`handler`** — Compaction commands: worker polls and job admission
//! - **`state_machine`** — State machine that applies committed entries

pub mod handler;
pub mod state_machine;
pub mod typ;

pub use handler::{CommandOutcome, handle_command};
pub use state_machine::StateMachine;
pub use typ::{
    AddCompactionJobsRequest, Command, MetastoreRaft, PollCompactionJobsRequest, Request,
    Response, TypeConfig,
};
