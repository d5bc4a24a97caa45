//! metastore-scheduler — compaction job scheduling.
//!
//! Distributes compaction jobs to stateless workers under time-bounded
//! leases. The scheduler runs inside the replicated state machine, so every
//! decision is a pure function of the committed log entry that triggered it:
//! the entry index is the assignment token and the entry timestamp is the
//! clock.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (single mutex)
//!   ├── JobQueue
//!   │     ├── per-level LevelQueue (ordered set of job states)
//!   │     └── name → state lookup
//!   ├── JobStore (plans + states, caller's transaction)
//!   └── per-level counters (introspection)
//!
//! Schedule (one per log entry)
//!   ├── assign_job / update_job / evict_job / add_job
//!   └── lazily cloned levels, pending updates
//!         └── CompactionPlanUpdate → Scheduler::update_schedule
//! ```

pub mod error;
pub mod metrics;
pub mod queue;
pub mod schedule;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use metrics::{LevelStats, render_prometheus};
pub use queue::{JobQueue, LevelQueue};
pub use schedule::{LogicalClock, Schedule};
pub use scheduler::Scheduler;
