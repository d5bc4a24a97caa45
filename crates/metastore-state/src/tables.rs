//! redb table definitions for the job store.
//!
//! Both tables use `&str` keys (the job name) and `&[u8]` values
//! (JSON-serialized domain types). Keys sort lexicographically, which gives
//! the ordered scans used by restore and snapshots.

use redb::TableDefinition;

/// Immutable compaction job plans keyed by job name.
pub const JOB_PLANS: TableDefinition<&str, &[u8]> = TableDefinition::new("compaction_job_plans");

/// Mutable compaction job states keyed by job name.
pub const JOB_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("compaction_job_states");
