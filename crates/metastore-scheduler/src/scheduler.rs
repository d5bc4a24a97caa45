//! Scheduler — owns the live compaction job queue.
//!
//! The `Scheduler`:
//! - Hands out [`Schedule`]s bound to a log entry
//! - Persists committed plan updates and applies them to the queue
//! - Rebuilds the queue from the store on start and snapshot restore
//! - Keeps per-level counters for introspection
//!
//! All state sits behind one mutex: assignment scans cross levels and need a
//! consistent view of the whole queue.

use std::sync::{Mutex, MutexGuard, PoisonError};

use metastore_core::SchedulerConfig;
use metastore_state::{CompactionJobState, CompactionPlanUpdate, JobStore};
use tracing::{debug, info};

use crate::error::SchedulerResult;
use crate::metrics::{LevelCounters, LevelStats};
use crate::queue::JobQueue;
use crate::schedule::{LogicalClock, Schedule};

pub(crate) struct SchedulerState {
    pub(crate) queue: JobQueue,
    pub(crate) counters: Vec<LevelCounters>,
}

impl SchedulerState {
    fn counters(&mut self, level: u32) -> &mut LevelCounters {
        let i = level as usize;
        if self.counters.len() <= i {
            self.counters.resize_with(i + 1, LevelCounters::default);
        }
        &mut self.counters[i]
    }
}

pub struct Scheduler<S: JobStore> {
    config: SchedulerConfig,
    store: S,
    state: Mutex<SchedulerState>,
}

impl<S: JobStore> Scheduler<S> {
    /// Create a scheduler with an empty queue. Call [`Scheduler::restore`]
    /// to load persisted jobs.
    pub fn new(config: SchedulerConfig, store: S) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(SchedulerState {
                queue: JobQueue::new(),
                counters: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Start the scheduling pass for the log entry at `clock`.
    pub fn new_schedule<'a>(&'a self, tx: &'a S::Tx, clock: LogicalClock) -> Schedule<'a, S> {
        Schedule::new(tx, self, clock)
    }

    /// Persist a committed plan update in `tx` and apply it to the queue.
    ///
    /// The queue is only touched once every write succeeded, so a failed
    /// update leaves it as it was and the caller can discard `tx`.
    pub fn update_schedule(&self, tx: &S::Tx, update: &CompactionPlanUpdate) -> SchedulerResult<()> {
        let mut inner = self.lock();

        for job in &update.new_jobs {
            self.store.store_job_plan(tx, &job.plan)?;
            self.store.store_job_state(tx, &job.state)?;
        }
        for job in &update.assigned_jobs {
            self.store.store_job_state(tx, &job.state)?;
        }
        for state in &update.updated_jobs {
            self.store.store_job_state(tx, state)?;
        }
        for state in update.completed_jobs.iter().chain(&update.evicted_jobs) {
            self.store.delete_job_plan(tx, &state.name)?;
            self.store.delete_job_state(tx, &state.name)?;
        }

        for job in &update.new_jobs {
            inner.queue.put(job.state.clone());
            inner.counters(job.state.compaction_level).added += 1;
        }
        for job in &update.assigned_jobs {
            inner.queue.put(job.state.clone());
            let counters = inner.counters(job.state.compaction_level);
            if job.state.failures > 0 {
                counters.reassigned += 1;
            } else {
                counters.assigned += 1;
            }
        }
        for state in &update.updated_jobs {
            inner.queue.put(state.clone());
        }
        for state in &update.completed_jobs {
            inner.queue.delete(&state.name);
            inner.counters(state.compaction_level).completed += 1;
        }
        for state in &update.evicted_jobs {
            inner.queue.delete(&state.name);
            inner.counters(state.compaction_level).evicted += 1;
        }

        debug!(
            new = update.new_jobs.len(),
            assigned = update.assigned_jobs.len(),
            updated = update.updated_jobs.len(),
            completed = update.completed_jobs.len(),
            evicted = update.evicted_jobs.len(),
            queue_size = inner.queue.size(),
            "compaction plan update applied"
        );
        Ok(())
    }

    /// Replace the queue with the job states persisted in `tx`.
    pub fn restore(&self, tx: &S::Tx) -> SchedulerResult<()> {
        let entries = self.store.list_entries(tx)?;
        let mut inner = self.lock();
        inner.queue.clear();
        let restored = entries.len();
        for state in entries {
            inner.queue.put(state);
        }
        info!(jobs = restored, "compaction job queue restored");
        Ok(())
    }

    /// Current state of a queued job.
    pub fn job_state(&self, name: &str) -> Option<CompactionJobState> {
        self.lock().queue.get(name).cloned()
    }

    pub fn queue_size(&self) -> usize {
        self.lock().queue.size()
    }

    /// Per-level queue gauges and lifetime counters, ordered by level.
    pub fn stats(&self) -> Vec<LevelStats> {
        let inner = self.lock();
        let levels = inner.queue.num_levels().max(inner.counters.len());
        (0..levels)
            .map(|i| {
                let mut stats = LevelStats {
                    level: i as u32,
                    ..Default::default()
                };
                if let Some(pq) = inner.queue.get_level(i) {
                    stats.count_jobs(pq.iter(), self.config.max_failures);
                }
                if let Some(counters) = inner.counters.get(i) {
                    stats.apply_counters(counters);
                }
                stats
            })
            .collect()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // Every mutation completes under the lock in one step.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
