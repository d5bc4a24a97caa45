//! Subcommand implementations.

use std::io::{BufRead, Write};

use anyhow::Context;
use metastore_core::SchedulerConfig;
use metastore_raft::{Request, StateMachine, TypeConfig};
use metastore_scheduler::{Scheduler, render_prometheus};
use metastore_state::StateStore;
use openraft::storage::RaftStateMachine;
use openraft::{CommittedLeaderId, Entry, EntryPayload, LogId};
use tracing::debug;

/// Term and node id stamped on replayed entries.
const REPLAY_TERM: u64 = 1;
const REPLAY_NODE: u64 = 1;

pub fn jobs(store: &StateStore, out: &mut impl Write) -> anyhow::Result<()> {
    let states = store.read_job_states()?;
    writeln!(
        out,
        "{:<40} {:>5} {:<12} {:>10} {:>8} {:>20}",
        "NAME", "LEVEL", "STATUS", "TOKEN", "FAILURES", "LEASE_EXPIRES_AT"
    )?;
    for state in &states {
        writeln!(
            out,
            "{:<40} {:>5} {:<12} {:>10} {:>8} {:>20}",
            state.name,
            state.compaction_level,
            state.status.to_string(),
            state.token,
            state.failures,
            state.lease_expires_at
        )?;
    }
    Ok(())
}

pub fn metrics(store: StateStore, config: SchedulerConfig, out: &mut impl Write) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(config, store.clone());
    let tx = store.begin_write()?;
    scheduler.restore(&tx)?;
    tx.abort()?;

    out.write_all(render_prometheus(&scheduler.stats()).as_bytes())?;
    Ok(())
}

/// Apply every request in `input` as a new log entry and print the responses.
///
/// Entries continue from the last applied index. Blank lines are skipped.
/// Returns the number of entries applied.
pub async fn replay(
    store: StateStore,
    config: SchedulerConfig,
    input: impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<usize> {
    let mut sm = StateMachine::new(store, config)?;
    let (last_applied, _) = sm.applied_state().await?;
    let mut index = last_applied.map_or(0, |l| l.index) + 1;
    let mut applied = 0;

    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: Request = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid request", lineno + 1))?;

        let entry = Entry::<TypeConfig> {
            log_id: LogId::new(CommittedLeaderId::new(REPLAY_TERM, REPLAY_NODE), index),
            payload: EntryPayload::Normal(request),
        };
        let response = sm
            .apply([entry])
            .await?
            .pop()
            .context("state machine returned no response")?;
        debug!(index, assigned = response.assigned_jobs.len(), "replayed entry");
        writeln!(out, "{}", serde_json::to_string(&response)?)?;

        index += 1;
        applied += 1;
    }

    Ok(applied)
}
