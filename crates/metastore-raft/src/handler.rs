//! Compaction command handler — turns one command into a plan update.
//!
//! Runs against a [`Schedule`] bound to the entry being applied and never
//! touches the scheduler directly; the caller persists the returned
//! [`CompactionPlanUpdate`].

use metastore_scheduler::{Schedule, SchedulerResult};
use metastore_state::{CompactionJobStatus, CompactionPlanUpdate, JobStore, NewCompactionJob};
use tracing::{debug, warn};

use crate::typ::{AddCompactionJobsRequest, Command, PollCompactionJobsRequest, Response};

/// Plan update to commit plus the reply for the proposer.
#[derive(Debug, Default, PartialEq)]
pub struct CommandOutcome {
    pub update: CompactionPlanUpdate,
    pub response: Response,
}

pub fn handle_command<S: JobStore>(
    schedule: &mut Schedule<'_, S>,
    command: &Command,
) -> SchedulerResult<CommandOutcome> {
    match command {
        Command::PollCompactionJobs(req) => poll_compaction_jobs(schedule, req),
        Command::AddCompactionJobs(req) => Ok(add_compaction_jobs(schedule, req)),
    }
}

/// Apply a worker's status reports, then hand it new work.
///
/// Reports are processed first: a revoked job frees a slot on the worker, so
/// it counts towards the assignment capacity.
pub fn poll_compaction_jobs<S: JobStore>(
    schedule: &mut Schedule<'_, S>,
    req: &PollCompactionJobsRequest,
) -> SchedulerResult<CommandOutcome> {
    let mut outcome = CommandOutcome::default();

    for status in &req.status_updates {
        match schedule.update_job(status) {
            None => {
                debug!(job = %status.name, token = status.token, "status update rejected, job revoked");
                outcome.response.revoked_jobs.push(status.name.clone());
            }
            Some(state) if state.status == CompactionJobStatus::Success => {
                outcome.update.completed_jobs.push(state);
            }
            Some(state) => outcome.update.updated_jobs.push(state),
        }
    }

    let capacity = req.assign_jobs_max as usize + outcome.response.revoked_jobs.len();
    for _ in 0..capacity {
        match schedule.assign_job()? {
            Some(job) => outcome.update.assigned_jobs.push(job),
            None => break,
        }
    }

    while let Some(evicted) = schedule.evict_job() {
        debug!(job = %evicted.name, failures = evicted.failures, "evicting failed compaction job");
        outcome.update.evicted_jobs.push(evicted);
    }

    outcome.response.assigned_jobs = outcome.update.assigned_jobs.clone();
    Ok(outcome)
}

/// Admit planned jobs, trimming failed jobs while the queue is over capacity.
pub fn add_compaction_jobs<S: JobStore>(
    schedule: &mut Schedule<'_, S>,
    req: &AddCompactionJobsRequest,
) -> CommandOutcome {
    let mut outcome = CommandOutcome::default();

    for plan in &req.plans {
        if let Some(evicted) = schedule.evict_job() {
            debug!(job = %evicted.name, failures = evicted.failures, "evicting failed compaction job");
            outcome.update.evicted_jobs.push(evicted);
        }
        match schedule.add_job(plan) {
            Some(state) => outcome.update.new_jobs.push(NewCompactionJob {
                state,
                plan: plan.clone(),
            }),
            None => {
                warn!(job = %plan.name, level = plan.compaction_level, "compaction job rejected by scheduler");
                outcome.response.rejected_jobs.push(plan.name.clone());
            }
        }
    }

    outcome
}
