//! Schedule — the scheduling decisions made for one committed log entry.
//!
//! A `Schedule` reads the scheduler's live queue but never mutates it. Pops
//! and pushes happen on lazily cloned levels, and every new job state is
//! kept in a pending map until the caller packages the results into a
//! [`CompactionPlanUpdate`](metastore_state::CompactionPlanUpdate) and hands
//! it to [`Scheduler::update_schedule`]. Dropping a schedule discards all of
//! its decisions.
//!
//! All decisions use the entry's index as the token and its timestamp as the
//! clock, so applying the same entry twice yields the same result.

use std::collections::HashMap;
use std::sync::Arc;

use metastore_state::{
    AssignedCompactionJob, CompactionJobPlan, CompactionJobState, CompactionJobStatus,
    CompactionJobStatusUpdate, JobStore,
};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{JobQueue, LevelQueue};
use crate::scheduler::Scheduler;

/// Position and timestamp of the log entry being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalClock {
    pub index: u64,
    /// Unix nanoseconds.
    pub appended_at: i64,
}

impl LogicalClock {
    pub fn new(index: u64, appended_at: i64) -> Self {
        Self { index, appended_at }
    }
}

pub struct Schedule<'a, S: JobStore> {
    tx: &'a S::Tx,
    scheduler: &'a Scheduler<S>,
    now: i64,
    token: u64,
    /// Jobs touched by this schedule: name → new state.
    updates: HashMap<String, CompactionJobState>,
    /// Working copies of the queue levels, cloned on first access.
    copied: Vec<Option<LevelQueue>>,
    /// Assignment cursor; levels below it have nothing left to hand out.
    level: usize,
    added: usize,
    evicted: usize,
}

impl<'a, S: JobStore> Schedule<'a, S> {
    pub(crate) fn new(tx: &'a S::Tx, scheduler: &'a Scheduler<S>, clock: LogicalClock) -> Self {
        Self {
            tx,
            scheduler,
            now: clock.appended_at,
            token: clock.index,
            updates: HashMap::new(),
            copied: Vec::new(),
            level: 0,
            added: 0,
            evicted: 0,
        }
    }

    /// Pick the next job to hand out to a worker.
    ///
    /// Lower levels go first. Within a level, a never-assigned job is taken
    /// as is, an abandoned one is reassigned with one more failure. Jobs
    /// already touched by this schedule are skipped. Returns `None` when
    /// nothing is assignable.
    pub fn assign_job(&mut self) -> SchedulerResult<Option<AssignedCompactionJob>> {
        let scheduler = self.scheduler;
        let inner = scheduler.lock();
        let Some(state) = self.next_assignment(&inner.queue) else {
            return Ok(None);
        };

        let plan = match scheduler.store().get_job_plan(self.tx, &state.name) {
            Ok(plan) => plan,
            Err(e) if e.is_not_found() => return Err(SchedulerError::PlanNotFound(state.name)),
            Err(e) => return Err(e.into()),
        };

        debug!(
            job = %state.name,
            level = state.compaction_level,
            token = state.token,
            failures = state.failures,
            "compaction job assigned"
        );
        self.updates.insert(state.name.clone(), state.clone());
        Ok(Some(AssignedCompactionJob { state, plan }))
    }

    /// Apply a worker's status report.
    ///
    /// Returns the job's new state, or `None` if the job is gone, the report
    /// carries a superseded token, or the status is not a valid transition.
    pub fn update_job(&mut self, status: &CompactionJobStatusUpdate) -> Option<CompactionJobState> {
        let scheduler = self.scheduler;
        let inner = scheduler.lock();
        let state = inner.queue.get(&status.name)?;
        if state.token > status.token {
            return None;
        }

        let mut new_state = state.clone();
        match status.status {
            CompactionJobStatus::InProgress => {
                new_state.lease_expires_at = self.allocate_lease();
            }
            CompactionJobStatus::Success => {
                new_state.status = CompactionJobStatus::Success;
            }
            CompactionJobStatus::Unspecified => return None,
        }

        self.updates
            .insert(new_state.name.clone(), new_state.clone());
        Some(new_state)
    }

    /// Pick one failed job to drop while the queue is over capacity.
    ///
    /// Only the head of each level is considered; a level whose head is not
    /// failed has no failed jobs left in front of live ones.
    pub fn evict_job(&mut self) -> Option<CompactionJobState> {
        let scheduler = self.scheduler;
        let inner = scheduler.lock();
        let limit = scheduler.config().max_queue_size;
        let size = inner.queue.size().saturating_sub(self.evicted) as u64;
        if limit == 0 || size <= limit {
            return None;
        }

        for level in 0..inner.queue.num_levels() {
            while let Some(job) = self.level_copy(&inner.queue, level).pop() {
                if self.updates.contains_key(&job.name) {
                    // Touched by this schedule: neither evictable nor revisited.
                    continue;
                }
                if self.is_failed(&job) {
                    self.evicted += 1;
                    return Some(Arc::unwrap_or_clone(job));
                }
                self.level_copy(&inner.queue, level).push(job);
                break;
            }
        }
        None
    }

    /// Admit a newly planned job.
    ///
    /// Returns `None` if the queue is full or a job with the same name is
    /// already known.
    pub fn add_job(&mut self, plan: &CompactionJobPlan) -> Option<CompactionJobState> {
        let scheduler = self.scheduler;
        let inner = scheduler.lock();
        let limit = scheduler.config().max_queue_size;
        if limit > 0 && (self.added + inner.queue.size()) as u64 >= limit {
            return None;
        }
        if inner.queue.contains(&plan.name) || self.updates.contains_key(&plan.name) {
            return None;
        }

        let state = CompactionJobState {
            name: plan.name.clone(),
            compaction_level: plan.compaction_level,
            status: CompactionJobStatus::Unspecified,
            token: self.token,
            lease_expires_at: 0,
            added_at: self.now,
            failures: 0,
        };
        self.updates.insert(state.name.clone(), state.clone());
        self.added += 1;
        Some(state)
    }

    fn next_assignment(&mut self, queue: &JobQueue) -> Option<CompactionJobState> {
        while self.level < queue.num_levels() {
            let level = self.level;
            let Some(job) = self.level_copy(queue, level).pop() else {
                self.level += 1;
                continue;
            };
            if self.updates.contains_key(&job.name) {
                continue;
            }

            match job.status {
                CompactionJobStatus::Unspecified => return Some(self.assign(&job)),
                CompactionJobStatus::InProgress => {
                    if self.is_failed(&job) {
                        // Only failed jobs are left at this level.
                        self.level_copy(queue, level).push(job);
                        self.level += 1;
                        continue;
                    }
                    if self.is_abandoned(&job) {
                        let mut state = self.assign(&job);
                        state.failures += 1;
                        return Some(state);
                    }
                }
                CompactionJobStatus::Success => {}
            }
        }
        None
    }

    fn assign(&self, job: &CompactionJobState) -> CompactionJobState {
        let mut state = job.clone();
        state.status = CompactionJobStatus::InProgress;
        state.lease_expires_at = self.allocate_lease();
        state.token = self.token;
        state
    }

    fn allocate_lease(&self) -> i64 {
        let lease = i64::try_from(self.scheduler.config().lease_duration.as_nanos())
            .unwrap_or(i64::MAX);
        self.now.saturating_add(lease)
    }

    fn is_failed(&self, job: &CompactionJobState) -> bool {
        let limit = self.scheduler.config().max_failures;
        limit > 0 && u64::from(job.failures) >= limit
    }

    fn is_abandoned(&self, job: &CompactionJobState) -> bool {
        !self.is_failed(job) && self.now > job.lease_expires_at
    }

    fn level_copy(&mut self, queue: &JobQueue, i: usize) -> &mut LevelQueue {
        if self.copied.len() <= i {
            self.copied.resize_with(i + 1, || None);
        }
        self.copied[i].get_or_insert_with(|| queue.get_level(i).cloned().unwrap_or_default())
    }
}
