//! Job queue — per-level priority ordering of compaction jobs.
//!
//! Each compaction level keeps its jobs in an ordered set. The order is a
//! total function of the stored state:
//!
//! 1. status (never-assigned jobs first),
//! 2. failures (fewer first),
//! 3. lease expiry (earlier first),
//! 4. admission time (earlier first),
//! 5. name.
//!
//! Iteration never depends on hash order, so every replica pops jobs in
//! the same sequence.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use metastore_state::{CompactionJobState, CompactionJobStatus};

/// Job state wrapped for ordering inside a level.
#[derive(Debug, Clone)]
struct JobEntry(Arc<CompactionJobState>);

impl JobEntry {
    fn key(&self) -> (CompactionJobStatus, u32, i64, i64, &str) {
        let s = &self.0;
        (
            s.status,
            s.failures,
            s.lease_expires_at,
            s.added_at,
            s.name.as_str(),
        )
    }
}

impl PartialEq for JobEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for JobEntry {}

impl PartialOrd for JobEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority ordering of the jobs of one compaction level.
///
/// Cloning copies the ordering only; job states are shared behind `Arc`, so
/// a clone can be popped and pushed without touching the original.
#[derive(Debug, Clone, Default)]
pub struct LevelQueue {
    entries: BTreeSet<JobEntry>,
}

impl LevelQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return the highest-priority job.
    pub fn pop(&mut self) -> Option<Arc<CompactionJobState>> {
        self.entries.pop_first().map(|e| e.0)
    }

    pub fn push(&mut self, state: Arc<CompactionJobState>) {
        self.entries.insert(JobEntry(state));
    }

    /// Jobs in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &CompactionJobState> + '_ {
        self.entries.iter().map(|e| e.0.as_ref())
    }

    fn remove(&mut self, state: &Arc<CompactionJobState>) -> bool {
        self.entries.remove(&JobEntry(Arc::clone(state)))
    }
}

/// All queued compaction jobs, by level, plus a name lookup.
#[derive(Debug, Default)]
pub struct JobQueue {
    levels: Vec<LevelQueue>,
    jobs: HashMap<String, Arc<CompactionJobState>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job.
    pub fn put(&mut self, state: CompactionJobState) {
        let state = Arc::new(state);
        if let Some(previous) = self.jobs.insert(state.name.clone(), Arc::clone(&state)) {
            let level = previous.compaction_level as usize;
            if let Some(pq) = self.levels.get_mut(level) {
                pq.remove(&previous);
            }
        }
        self.level(state.compaction_level as usize).push(state);
    }

    /// Remove a job by name, returning its last state.
    pub fn delete(&mut self, name: &str) -> Option<CompactionJobState> {
        let state = self.jobs.remove(name)?;
        if let Some(pq) = self.levels.get_mut(state.compaction_level as usize) {
            pq.remove(&state);
        }
        Some(Arc::unwrap_or_clone(state))
    }

    /// The ordering of level `i`, growing the level list if needed.
    pub fn level(&mut self, i: usize) -> &mut LevelQueue {
        if self.levels.len() <= i {
            self.levels.resize_with(i + 1, LevelQueue::default);
        }
        &mut self.levels[i]
    }

    /// The ordering of level `i`, if the level exists.
    pub fn get_level(&self, i: usize) -> Option<&LevelQueue> {
        self.levels.get(i)
    }

    /// Number of levels, including empty ones below the highest level seen.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn get(&self, name: &str) -> Option<&CompactionJobState> {
        self.jobs.get(name).map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Total number of jobs across all levels.
    pub fn size(&self) -> usize {
        self.jobs.len()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.jobs.clear();
    }
}
