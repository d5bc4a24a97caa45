//! Scheduling properties that must hold on every replica.
//!
//! Each test drives a full schedule (status updates, assignments, eviction,
//! admission) the way the Raft apply path does, and checks the outcome.

use std::time::Duration;

use metastore_core::SchedulerConfig;
use metastore_scheduler::{LogicalClock, Scheduler, SchedulerError};
use metastore_state::*;

const LEASE: Duration = Duration::from_secs(10);
const SECOND: i64 = 1_000_000_000;

fn config(max_failures: u64, max_queue_size: u64) -> SchedulerConfig {
    SchedulerConfig {
        max_failures,
        lease_duration: LEASE,
        max_queue_size,
    }
}

fn new_job(name: &str, level: u32, added_at: i64) -> NewCompactionJob {
    NewCompactionJob {
        state: CompactionJobState {
            name: name.to_string(),
            compaction_level: level,
            added_at,
            token: 1,
            ..Default::default()
        },
        plan: CompactionJobPlan::new(name, level),
    }
}

fn seeded(cfg: SchedulerConfig, jobs: Vec<NewCompactionJob>) -> (Scheduler<StateStore>, StateStore) {
    let store = StateStore::open_in_memory().unwrap();
    let scheduler = Scheduler::new(cfg, store.clone());
    let tx = store.begin_write().unwrap();
    scheduler
        .update_schedule(
            &tx,
            &CompactionPlanUpdate {
                new_jobs: jobs,
                ..Default::default()
            },
        )
        .unwrap();
    tx.commit().unwrap();
    (scheduler, store)
}

/// One poll from a worker followed by planner admissions, within one entry.
fn drive(
    scheduler: &Scheduler<StateStore>,
    tx: &<StateStore as JobStore>::Tx,
    clock: LogicalClock,
    reports: &[CompactionJobStatusUpdate],
    capacity: usize,
    plans: &[CompactionJobPlan],
) -> CompactionPlanUpdate {
    let mut schedule = scheduler.new_schedule(tx, clock);
    let mut update = CompactionPlanUpdate::default();

    for report in reports {
        match schedule.update_job(report) {
            Some(state) if state.status == CompactionJobStatus::Success => {
                update.completed_jobs.push(state)
            }
            Some(state) => update.updated_jobs.push(state),
            None => {}
        }
    }
    for _ in 0..capacity {
        match schedule.assign_job().unwrap() {
            Some(job) => update.assigned_jobs.push(job),
            None => break,
        }
    }
    while let Some(evicted) = schedule.evict_job() {
        update.evicted_jobs.push(evicted);
    }
    for plan in plans {
        if let Some(state) = schedule.add_job(plan) {
            update.new_jobs.push(NewCompactionJob {
                state,
                plan: plan.clone(),
            });
        }
    }
    update
}

fn initial_jobs() -> Vec<NewCompactionJob> {
    vec![
        new_job("l0-b", 0, 2),
        new_job("l0-a", 0, 2),
        new_job("l0-c", 0, 1),
        new_job("l1-a", 1, 1),
        new_job("l2-a", 2, 0),
    ]
}

#[test]
fn same_entry_yields_same_plan_update() {
    let clock = LogicalClock::new(10, 100 * SECOND);
    let plans = vec![CompactionJobPlan::new("l0-d", 0), CompactionJobPlan::new("l1-b", 1)];

    // Two replicas with independent stores and hash seeds.
    let (first, first_store) = seeded(config(3, 0), initial_jobs());
    let (second, second_store) = seeded(config(3, 0), initial_jobs());

    let tx1 = first_store.begin_write().unwrap();
    let tx2 = second_store.begin_write().unwrap();
    let a = drive(&first, &tx1, clock, &[], 4, &plans);
    let b = drive(&second, &tx2, clock, &[], 4, &plans);
    assert_eq!(a, b);

    // Re-running the entry on the same replica before commit.
    let again = drive(&first, &tx1, clock, &[], 4, &plans);
    assert_eq!(a, again);

    let names: Vec<&str> = a.assigned_jobs.iter().map(|j| j.state.name.as_str()).collect();
    assert_eq!(names, vec!["l0-c", "l0-a", "l0-b", "l1-a"]);
}

#[test]
fn replicas_converge_over_many_entries() {
    let (first, first_store) = seeded(config(2, 6), initial_jobs());
    let (second, second_store) = seeded(config(2, 6), initial_jobs());

    for index in 2..40u64 {
        let clock = LogicalClock::new(index, index as i64 * 4 * SECOND);
        let plans = vec![CompactionJobPlan::new(format!("job-{index}"), (index % 3) as u32)];

        let mut updates = Vec::new();
        for (scheduler, store) in [(&first, &first_store), (&second, &second_store)] {
            let tx = store.begin_write().unwrap();
            // Workers report success only for jobs assigned at even indices.
            let reports: Vec<CompactionJobStatusUpdate> = store
                .list_entries(&tx)
                .unwrap()
                .into_iter()
                .filter(|s| s.status == CompactionJobStatus::InProgress && s.token % 2 == 0)
                .map(|s| CompactionJobStatusUpdate {
                    name: s.name,
                    token: s.token,
                    status: CompactionJobStatus::Success,
                })
                .collect();
            let update = drive(scheduler, &tx, clock, &reports, 1, &plans);
            scheduler.update_schedule(&tx, &update).unwrap();
            tx.commit().unwrap();
            updates.push(update);
        }
        assert_eq!(updates[0], updates[1], "diverged at index {index}");
    }

    assert_eq!(
        first_store.read_job_states().unwrap(),
        second_store.read_job_states().unwrap()
    );
    assert_eq!(first.stats(), second.stats());
}

#[test]
fn abandoned_job_token_and_failures_advance() {
    let (scheduler, store) = seeded(config(3, 0), vec![new_job("a", 0, 0)]);

    let mut last_token = 1;
    for (attempt, index) in [5u64, 9, 14, 20].into_iter().enumerate() {
        // Each entry is far past the previous lease.
        let clock = LogicalClock::new(index, index as i64 * 100 * SECOND);
        let tx = store.begin_write().unwrap();
        let update = drive(&scheduler, &tx, clock, &[], 1, &[]);
        scheduler.update_schedule(&tx, &update).unwrap();
        tx.commit().unwrap();

        let state = &update.assigned_jobs[0].state;
        assert!(state.token > last_token);
        assert_eq!(state.failures, attempt as u32);
        assert_eq!(
            state.lease_expires_at,
            clock.appended_at + LEASE.as_nanos() as i64
        );
        last_token = state.token;
    }

    // Failure threshold reached: never handed out again.
    let tx = store.begin_write().unwrap();
    let update = drive(&scheduler, &tx, LogicalClock::new(40, 10_000 * SECOND), &[], 1, &[]);
    assert!(update.assigned_jobs.is_empty());
}

#[test]
fn stale_worker_loses_job_after_reassignment() {
    let (scheduler, store) = seeded(config(3, 0), vec![new_job("a", 0, 0)]);

    let tx = store.begin_write().unwrap();
    let first = drive(&scheduler, &tx, LogicalClock::new(2, SECOND), &[], 1, &[]);
    scheduler.update_schedule(&tx, &first).unwrap();
    let stale_token = first.assigned_jobs[0].state.token;

    // Lease expired, job reassigned at index 20.
    let second = drive(&scheduler, &tx, LogicalClock::new(20, 60 * SECOND), &[], 1, &[]);
    scheduler.update_schedule(&tx, &second).unwrap();
    assert_eq!(second.assigned_jobs[0].state.token, 20);

    let report = CompactionJobStatusUpdate {
        name: "a".to_string(),
        token: stale_token,
        status: CompactionJobStatus::Success,
    };
    let mut schedule = scheduler.new_schedule(&tx, LogicalClock::new(21, 61 * SECOND));
    assert!(schedule.update_job(&report).is_none());
    assert_eq!(scheduler.job_state("a").unwrap().token, 20);
}

#[test]
fn failed_jobs_are_evicted_one_at_a_time_down_to_limit() {
    let (scheduler, store) = seeded(
        config(1, 0),
        vec![new_job("a", 0, 0), new_job("b", 0, 1), new_job("c", 0, 2)],
    );

    // Assign everything, then let every lease lapse once: one failure each.
    let tx = store.begin_write().unwrap();
    let assigned = drive(&scheduler, &tx, LogicalClock::new(2, SECOND), &[], 3, &[]);
    scheduler.update_schedule(&tx, &assigned).unwrap();
    let reassigned = drive(&scheduler, &tx, LogicalClock::new(3, 100 * SECOND), &[], 3, &[]);
    scheduler.update_schedule(&tx, &reassigned).unwrap();
    assert!(reassigned.assigned_jobs.iter().all(|j| j.state.failures == 1));
    tx.commit().unwrap();

    // Same queue, now capped at two entries.
    let capped = Scheduler::new(config(1, 2), store.clone());
    let tx = store.begin_write().unwrap();
    capped.restore(&tx).unwrap();

    let mut schedule = capped.new_schedule(&tx, LogicalClock::new(4, 200 * SECOND));
    assert!(schedule.assign_job().unwrap().is_none());
    let evicted = schedule.evict_job().unwrap();
    assert_eq!(evicted.name, "a");
    assert!(schedule.evict_job().is_none());
    assert!(schedule.add_job(&CompactionJobPlan::new("d", 0)).is_none());
}

#[test]
fn admission_stops_at_queue_limit() {
    let (scheduler, store) = seeded(config(3, 3), vec![new_job("a", 0, 0)]);
    let tx = store.begin_write().unwrap();
    let plans: Vec<CompactionJobPlan> = ["b", "c", "d"]
        .into_iter()
        .map(|n| CompactionJobPlan::new(n, 0))
        .collect();

    let update = drive(&scheduler, &tx, LogicalClock::new(2, SECOND), &[], 0, &plans);
    let names: Vec<&str> = update.new_jobs.iter().map(|j| j.state.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
    assert!(
        update
            .new_jobs
            .iter()
            .all(|j| j.state.status == CompactionJobStatus::Unspecified)
    );
}

// ── Store failures ─────────────────────────────────────────────────

/// A store whose reads fail and whose writes are dropped.
struct BrokenStore;

impl JobStore for BrokenStore {
    type Tx = ();

    fn get_job_plan(&self, _tx: &(), _name: &str) -> StateResult<CompactionJobPlan> {
        Err(StateError::Read("disk on fire".to_string()))
    }
    fn store_job_plan(&self, _tx: &(), _plan: &CompactionJobPlan) -> StateResult<()> {
        Ok(())
    }
    fn delete_job_plan(&self, _tx: &(), _name: &str) -> StateResult<()> {
        Ok(())
    }
    fn get_job_state(&self, _tx: &(), _name: &str) -> StateResult<CompactionJobState> {
        Err(StateError::Read("disk on fire".to_string()))
    }
    fn store_job_state(&self, _tx: &(), state: &CompactionJobState) -> StateResult<()> {
        if state.name == "unwritable" {
            return Err(StateError::Write("read-only".to_string()));
        }
        Ok(())
    }
    fn delete_job_state(&self, _tx: &(), _name: &str) -> StateResult<()> {
        Ok(())
    }
    fn list_entries(&self, _tx: &()) -> StateResult<Vec<CompactionJobState>> {
        Err(StateError::Read("disk on fire".to_string()))
    }
}

#[test]
fn store_errors_propagate() {
    let scheduler = Scheduler::new(config(3, 0), BrokenStore);
    scheduler
        .update_schedule(
            &(),
            &CompactionPlanUpdate {
                new_jobs: vec![new_job("a", 0, 0)],
                ..Default::default()
            },
        )
        .unwrap();

    let mut schedule = scheduler.new_schedule(&(), LogicalClock::new(2, SECOND));
    let err = schedule.assign_job().unwrap_err();
    assert!(matches!(err, SchedulerError::State(StateError::Read(_))));

    assert!(scheduler.restore(&()).is_err());
    assert_eq!(scheduler.queue_size(), 1);
}

#[test]
fn failed_update_leaves_queue_untouched() {
    let scheduler = Scheduler::new(config(3, 0), BrokenStore);
    let result = scheduler.update_schedule(
        &(),
        &CompactionPlanUpdate {
            new_jobs: vec![new_job("a", 0, 0), new_job("unwritable", 0, 0)],
            ..Default::default()
        },
    );
    assert!(result.is_err());
    assert_eq!(scheduler.queue_size(), 0);
}
