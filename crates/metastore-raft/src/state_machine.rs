//! Raft state machine backed by redb.
//!
//! Applies committed Raft entries to the compaction scheduler and its job
//! store. Supports snapshots of both job tables for log compaction.

use std::io::Cursor;
use std::sync::Arc;

use metastore_core::SchedulerConfig;
use metastore_scheduler::{LogicalClock, Scheduler, SchedulerResult};
use metastore_state::{
    CompactionJobPlan, CompactionJobState, JobStore, StateError, StateStore,
};
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine};
use openraft::{
    Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, Snapshot, SnapshotMeta, StorageError,
    StoredMembership,
};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::handler::handle_command;
use crate::typ::{Response, TypeConfig};

/// redb table for state machine metadata.
const SM_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_sm_meta");

const APPLIED_KEY: &str = "last_applied";
const MEMBERSHIP_KEY: &str = "membership";

fn read_err(e: impl std::fmt::Display) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::Store,
        ErrorVerb::Read,
        std::io::Error::other(e.to_string()),
    )
}

fn write_err(e: impl std::fmt::Display) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::Store,
        ErrorVerb::Write,
        std::io::Error::other(e.to_string()),
    )
}

fn get_meta<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>, StorageError<u64>> {
    match table.get(key).map_err(read_err)? {
        Some(val) => Ok(Some(serde_json::from_slice(val.value()).map_err(read_err)?)),
        None => Ok(None),
    }
}

fn put_meta<T: Serialize>(
    txn: &WriteTransaction,
    key: &str,
    value: &T,
) -> Result<(), StorageError<u64>> {
    let data = serde_json::to_vec(value).map_err(write_err)?;
    let mut table = txn.open_table(SM_META_TABLE).map_err(write_err)?;
    table.insert(key, data.as_slice()).map_err(write_err)?;
    Ok(())
}

/// Snapshot payload: the full contents of both job tables.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct SnapshotData {
    plans: Vec<CompactionJobPlan>,
    states: Vec<CompactionJobState>,
}

/// Raft state machine driving the compaction scheduler.
pub struct StateMachine {
    store: StateStore,
    scheduler: Arc<Scheduler<StateStore>>,
}

/// Snapshot builder that reads the committed job tables.
pub struct SmSnapshotBuilder {
    store: StateStore,
}

impl StateMachine {
    /// Create a state machine over `store` and load the persisted jobs into
    /// a fresh scheduler.
    pub fn new(store: StateStore, config: SchedulerConfig) -> SchedulerResult<Self> {
        let scheduler = Arc::new(Scheduler::new(config, store.clone()));

        let txn = store.begin_write()?;
        txn.open_table(SM_META_TABLE)
            .map_err(|e| StateError::Table(e.to_string()))?;
        scheduler.restore(&txn)?;
        txn.commit()
            .map_err(|e| StateError::Transaction(e.to_string()))?;

        Ok(Self { store, scheduler })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<StateStore>> {
        &self.scheduler
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn apply_entry(&self, entry: Entry<TypeConfig>) -> Result<Response, StorageError<u64>> {
        let log_id = entry.log_id;
        let txn = self.store.begin_write().map_err(write_err)?;
        put_meta(&txn, APPLIED_KEY, &Some(log_id))?;

        let response = match entry.payload {
            EntryPayload::Blank => Response::default(),
            EntryPayload::Normal(req) => {
                let clock = LogicalClock::new(log_id.index, req.appended_at);
                let mut schedule = self.scheduler.new_schedule(&txn, clock);
                let outcome = handle_command(&mut schedule, &req.command).map_err(write_err)?;
                // The queue is untouched if persisting the update fails.
                self.scheduler
                    .update_schedule(&txn, &outcome.update)
                    .map_err(write_err)?;
                outcome.response
            }
            EntryPayload::Membership(membership) => {
                let stored = StoredMembership::new(Some(log_id), membership);
                put_meta(&txn, MEMBERSHIP_KEY, &stored)?;
                Response::default()
            }
        };

        self.commit(txn)?;
        debug!(index = log_id.index, "applied entry to state machine");
        Ok(response)
    }

    /// Commit `txn`, rebuilding the queue from the store if the commit fails
    /// so it never runs ahead of what was persisted.
    fn commit(&self, txn: WriteTransaction) -> Result<(), StorageError<u64>> {
        let Err(e) = txn.commit() else {
            return Ok(());
        };
        error!(error = %e, "state machine commit failed, reloading compaction queue");
        let txn = self.store.begin_write().map_err(read_err)?;
        self.scheduler.restore(&txn).map_err(read_err)?;
        txn.abort().map_err(read_err)?;
        Err(write_err(e))
    }

    fn snapshot_builder(&self) -> SmSnapshotBuilder {
        SmSnapshotBuilder {
            store: self.store.clone(),
        }
    }
}

impl RaftStateMachine<TypeConfig> for StateMachine {
    type SnapshotBuilder = SmSnapshotBuilder;

    async fn applied_state(
        &mut self,
    ) -> Result<
        (
            Option<LogId<u64>>,
            StoredMembership<u64, openraft::BasicNode>,
        ),
        StorageError<u64>,
    > {
        let txn = self.store.begin_read().map_err(read_err)?;
        let table = txn.open_table(SM_META_TABLE).map_err(read_err)?;
        let applied = get_meta::<Option<LogId<u64>>>(&table, APPLIED_KEY)?.flatten();
        let membership: StoredMembership<u64, openraft::BasicNode> =
            get_meta(&table, MEMBERSHIP_KEY)?.unwrap_or_default();
        Ok((applied, membership))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Response>, StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut responses = Vec::new();
        for entry in entries {
            responses.push(self.apply_entry(entry)?);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.snapshot_builder()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<u64>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, openraft::BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        let data = snapshot.into_inner();
        let data: SnapshotData = serde_json::from_slice(&data).map_err(read_err)?;

        // Replace both job tables and the metadata in one transaction.
        let txn = self.store.begin_write().map_err(write_err)?;
        self.store.clear(&txn).map_err(write_err)?;
        for plan in &data.plans {
            self.store.store_job_plan(&txn, plan).map_err(write_err)?;
        }
        for state in &data.states {
            self.store.store_job_state(&txn, state).map_err(write_err)?;
        }
        put_meta(&txn, APPLIED_KEY, &meta.last_log_id)?;
        put_meta(&txn, MEMBERSHIP_KEY, &meta.last_membership)?;
        self.scheduler.restore(&txn).map_err(write_err)?;
        self.commit(txn)?;

        info!(
            snapshot_id = %meta.snapshot_id,
            jobs = data.states.len(),
            "installed snapshot"
        );
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        let (applied, _) = self.applied_state().await?;
        if applied.is_none() {
            return Ok(None);
        }

        let snapshot = self.snapshot_builder().build_snapshot().await?;
        Ok(Some(snapshot))
    }
}

impl RaftSnapshotBuilder<TypeConfig> for SmSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        // Tables and metadata come from the same read transaction.
        let txn = self.store.begin_read().map_err(read_err)?;
        let data = SnapshotData {
            plans: self.store.job_plans_at(&txn).map_err(read_err)?,
            states: self.store.job_states_at(&txn).map_err(read_err)?,
        };

        let meta_table = txn.open_table(SM_META_TABLE).map_err(read_err)?;
        let last_applied: Option<LogId<u64>> =
            get_meta::<Option<LogId<u64>>>(&meta_table, APPLIED_KEY)?.flatten();
        let membership: StoredMembership<u64, openraft::BasicNode> =
            get_meta(&meta_table, MEMBERSHIP_KEY)?.unwrap_or_default();
        drop(meta_table);
        drop(txn);

        let bytes = serde_json::to_vec(&data).map_err(read_err)?;
        let snapshot_id = format!("snap-{}", last_applied.map_or(0, |l| l.index));
        debug!(%snapshot_id, jobs = data.states.len(), "built snapshot");

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership: membership,
            snapshot_id,
        };

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(bytes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metastore_state::{CompactionJobStatus, CompactionJobStatusUpdate};
    use openraft::CommittedLeaderId;

    use super::*;
    use crate::typ::{AddCompactionJobsRequest, Command, PollCompactionJobsRequest, Request};

    const SECOND: i64 = 1_000_000_000;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_failures: 3,
            lease_duration: Duration::from_secs(10),
            max_queue_size: 100,
        }
    }

    fn test_sm() -> StateMachine {
        StateMachine::new(StateStore::open_in_memory().unwrap(), config()).unwrap()
    }

    fn entry(index: u64, appended_at: i64, command: Command) -> Entry<TypeConfig> {
        Entry::<TypeConfig> {
            log_id: LogId::new(CommittedLeaderId::new(1, 1), index),
            payload: EntryPayload::Normal(Request {
                appended_at,
                command,
            }),
        }
    }

    fn add(names: &[&str]) -> Command {
        Command::AddCompactionJobs(AddCompactionJobsRequest {
            plans: names
                .iter()
                .map(|n| CompactionJobPlan::new(*n, 0))
                .collect(),
        })
    }

    fn poll(status_updates: Vec<CompactionJobStatusUpdate>, assign_jobs_max: u32) -> Command {
        Command::PollCompactionJobs(PollCompactionJobsRequest {
            status_updates,
            assign_jobs_max,
        })
    }

    fn workload() -> Vec<Entry<TypeConfig>> {
        vec![
            entry(1, SECOND, add(&["a", "b", "c"])),
            entry(2, 2 * SECOND, poll(vec![], 2)),
            entry(
                3,
                3 * SECOND,
                poll(
                    vec![CompactionJobStatusUpdate {
                        name: "a".to_string(),
                        token: 2,
                        status: CompactionJobStatus::Success,
                    }],
                    1,
                ),
            ),
            // "b" was never renewed; its lease has expired.
            entry(4, 30 * SECOND, poll(vec![], 1)),
        ]
    }

    #[tokio::test]
    async fn empty_state_machine() {
        let mut sm = test_sm();
        let (applied, _membership) = sm.applied_state().await.unwrap();
        assert!(applied.is_none());
        assert!(sm.get_current_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_adds_and_assigns_jobs() {
        let mut sm = test_sm();
        let responses = sm
            .apply([
                entry(1, SECOND, add(&["a", "b"])),
                entry(2, 2 * SECOND, poll(vec![], 1)),
            ])
            .await
            .unwrap();

        assert_eq!(responses[0], Response::default());
        let assigned = &responses[1].assigned_jobs;
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].plan.name, "a");
        assert_eq!(assigned[0].state.token, 2);
        assert_eq!(assigned[0].state.lease_expires_at, 12 * SECOND);

        let (applied, _) = sm.applied_state().await.unwrap();
        assert_eq!(applied.unwrap().index, 2);

        let persisted = sm.store().read_job_states().unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].status, CompactionJobStatus::InProgress);
    }

    #[tokio::test]
    async fn blank_entry_only_advances_applied() {
        let mut sm = test_sm();
        let blank = Entry::<TypeConfig> {
            log_id: LogId::new(CommittedLeaderId::new(1, 1), 1),
            payload: EntryPayload::Blank,
        };
        let responses = sm.apply([blank]).await.unwrap();
        assert_eq!(responses, vec![Response::default()]);
        assert_eq!(sm.scheduler().queue_size(), 0);
        let (applied, _) = sm.applied_state().await.unwrap();
        assert_eq!(applied.unwrap().index, 1);
    }

    #[tokio::test]
    async fn replicas_apply_entries_identically() {
        let mut first = test_sm();
        let mut second = test_sm();

        let a = first.apply(workload()).await.unwrap();
        let b = second.apply(workload()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(
            first.store().read_job_states().unwrap(),
            second.store().read_job_states().unwrap()
        );

        // "a" completed, "b" reassigned with a failure, "c" handed out at 3.
        let reassigned = &a[3].assigned_jobs;
        assert_eq!(reassigned.len(), 1);
        assert_eq!(reassigned[0].state.name, "b");
        assert_eq!(reassigned[0].state.failures, 1);
        assert_eq!(reassigned[0].state.token, 4);
        assert!(first.scheduler().job_state("a").is_none());
    }

    #[tokio::test]
    async fn restart_restores_queue() {
        let store = StateStore::open_in_memory().unwrap();
        {
            let mut sm = StateMachine::new(store.clone(), config()).unwrap();
            sm.apply(workload()).await.unwrap();
        }

        let mut sm = StateMachine::new(store, config()).unwrap();
        assert_eq!(sm.scheduler().queue_size(), 2);
        assert_eq!(sm.scheduler().job_state("b").unwrap().token, 4);
        let (applied, _) = sm.applied_state().await.unwrap();
        assert_eq!(applied.unwrap().index, 4);
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let mut sm = test_sm();
        sm.apply(workload()).await.unwrap();

        let mut builder = sm.get_snapshot_builder().await;
        let snapshot = builder.build_snapshot().await.unwrap();
        assert_eq!(snapshot.meta.snapshot_id, "snap-4");

        let mut follower = test_sm();
        follower
            .apply([entry(1, SECOND, add(&["stale"]))])
            .await
            .unwrap();
        follower
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .unwrap();

        assert!(follower.scheduler().job_state("stale").is_none());
        assert_eq!(follower.scheduler().queue_size(), 2);
        assert_eq!(
            follower.store().read_job_plans().unwrap(),
            sm.store().read_job_plans().unwrap()
        );
        let (applied, _) = follower.applied_state().await.unwrap();
        assert_eq!(applied.unwrap().index, 4);

        // Both replicas make the same decision for the next entry.
        let next = || entry(5, 31 * SECOND, poll(vec![], 4));
        let leader = sm.apply([next()]).await.unwrap();
        let replayed = follower.apply([next()]).await.unwrap();
        assert_eq!(leader, replayed);
    }
}
