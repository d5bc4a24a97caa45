//! Job store — transactional persistence of compaction job records.
//!
//! [`JobStore`] is the contract the scheduler consumes; [`StateStore`]
//! implements it on top of redb. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Per-job CRUD over plans and states, scoped to a caller-supplied
/// transaction.
///
/// Implementations never commit or roll back `tx`: the caller owns the
/// transaction boundary.
pub trait JobStore: Send + Sync {
    type Tx;

    /// Fails with [`StateError::NotFound`] if the plan does not exist.
    fn get_job_plan(&self, tx: &Self::Tx, name: &str) -> StateResult<CompactionJobPlan>;
    fn store_job_plan(&self, tx: &Self::Tx, plan: &CompactionJobPlan) -> StateResult<()>;
    fn delete_job_plan(&self, tx: &Self::Tx, name: &str) -> StateResult<()>;

    /// Fails with [`StateError::NotFound`] if the state does not exist.
    fn get_job_state(&self, tx: &Self::Tx, name: &str) -> StateResult<CompactionJobState>;
    fn store_job_state(&self, tx: &Self::Tx, state: &CompactionJobState) -> StateResult<()>;
    fn delete_job_state(&self, tx: &Self::Tx, name: &str) -> StateResult<()>;

    /// All persisted job states, ordered by job name.
    fn list_entries(&self, tx: &Self::Tx) -> StateResult<Vec<CompactionJobState>>;
}

/// Thread-safe job store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "job store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory job store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.begin_write()?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOB_PLANS).map_err(map_err!(Table))?;
        txn.open_table(JOB_STATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn begin_write(&self) -> StateResult<WriteTransaction> {
        self.db.begin_write().map_err(map_err!(Transaction))
    }

    pub fn begin_read(&self) -> StateResult<ReadTransaction> {
        self.db.begin_read().map_err(map_err!(Transaction))
    }

    /// Remove every plan and state in `tx`. Returns the number of job states
    /// removed.
    pub fn clear(&self, tx: &WriteTransaction) -> StateResult<usize> {
        clear_table(tx, JOB_PLANS)?;
        clear_table(tx, JOB_STATES)
    }

    /// Job states visible to a read transaction, ordered by job name.
    pub fn job_states_at(&self, txn: &ReadTransaction) -> StateResult<Vec<CompactionJobState>> {
        let table = txn.open_table(JOB_STATES).map_err(map_err!(Table))?;
        collect_values(&table)
    }

    /// Job plans visible to a read transaction, ordered by job name.
    pub fn job_plans_at(&self, txn: &ReadTransaction) -> StateResult<Vec<CompactionJobPlan>> {
        let table = txn.open_table(JOB_PLANS).map_err(map_err!(Table))?;
        collect_values(&table)
    }

    /// Job states as of the latest committed transaction.
    pub fn read_job_states(&self) -> StateResult<Vec<CompactionJobState>> {
        self.job_states_at(&self.begin_read()?)
    }

    /// Job plans as of the latest committed transaction.
    pub fn read_job_plans(&self) -> StateResult<Vec<CompactionJobPlan>> {
        self.job_plans_at(&self.begin_read()?)
    }
}

impl JobStore for StateStore {
    type Tx = WriteTransaction;

    fn get_job_plan(&self, tx: &WriteTransaction, name: &str) -> StateResult<CompactionJobPlan> {
        get_value(tx, JOB_PLANS, name)?
            .ok_or_else(|| StateError::NotFound(format!("job plan {name}")))
    }

    fn store_job_plan(&self, tx: &WriteTransaction, plan: &CompactionJobPlan) -> StateResult<()> {
        put_value(tx, JOB_PLANS, &plan.name, plan)
    }

    fn delete_job_plan(&self, tx: &WriteTransaction, name: &str) -> StateResult<()> {
        remove_value(tx, JOB_PLANS, name)
    }

    fn get_job_state(&self, tx: &WriteTransaction, name: &str) -> StateResult<CompactionJobState> {
        get_value(tx, JOB_STATES, name)?
            .ok_or_else(|| StateError::NotFound(format!("job state {name}")))
    }

    fn store_job_state(
        &self,
        tx: &WriteTransaction,
        state: &CompactionJobState,
    ) -> StateResult<()> {
        put_value(tx, JOB_STATES, &state.name, state)
    }

    fn delete_job_state(&self, tx: &WriteTransaction, name: &str) -> StateResult<()> {
        remove_value(tx, JOB_STATES, name)
    }

    fn list_entries(&self, tx: &WriteTransaction) -> StateResult<Vec<CompactionJobState>> {
        let table = tx.open_table(JOB_STATES).map_err(map_err!(Table))?;
        collect_values(&table)
    }
}

fn get_value<T: DeserializeOwned>(
    tx: &WriteTransaction,
    def: JsonTable,
    key: &str,
) -> StateResult<Option<T>> {
    let table = tx.open_table(def).map_err(map_err!(Table))?;
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn put_value<T: Serialize>(
    tx: &WriteTransaction,
    def: JsonTable,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    let mut table = tx.open_table(def).map_err(map_err!(Table))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Deleting an absent key is not an error.
fn remove_value(tx: &WriteTransaction, def: JsonTable, key: &str) -> StateResult<()> {
    let mut table = tx.open_table(def).map_err(map_err!(Table))?;
    table.remove(key).map_err(map_err!(Write))?;
    Ok(())
}

fn clear_table(tx: &WriteTransaction, def: JsonTable) -> StateResult<usize> {
    let mut table = tx.open_table(def).map_err(map_err!(Table))?;
    let keys: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .map(|item| item.map(|(k, _)| k.value().to_string()))
        .collect::<Result<_, _>>()
        .map_err(map_err!(Read))?;
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len())
}

fn collect_values<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let item = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(item);
    }
    Ok(results)
}
