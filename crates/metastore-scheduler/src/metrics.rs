//! Queue introspection and Prometheus text exposition.
//!
//! Gauges are computed from the live queue on demand; counters accumulate
//! as plan updates are applied and live for the lifetime of the process.

use metastore_state::{CompactionJobState, CompactionJobStatus};

/// Lifetime event counters for one level.
#[derive(Debug, Clone, Default)]
pub(crate) struct LevelCounters {
    pub(crate) added: u64,
    pub(crate) assigned: u64,
    pub(crate) reassigned: u64,
    pub(crate) completed: u64,
    pub(crate) evicted: u64,
}

/// Point-in-time view of one queue level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub level: u32,
    /// Jobs never handed out.
    pub unassigned: u64,
    /// Jobs owned by a worker (lease may have expired).
    pub in_progress: u64,
    /// Jobs that reached the failure threshold.
    pub failed: u64,
    pub added: u64,
    /// First-time assignments.
    pub assigned: u64,
    /// Assignments of abandoned jobs.
    pub reassigned: u64,
    pub completed: u64,
    pub evicted: u64,
}

impl LevelStats {
    pub(crate) fn count_jobs<'a>(
        &mut self,
        jobs: impl Iterator<Item = &'a CompactionJobState>,
        max_failures: u64,
    ) {
        for job in jobs {
            match job.status {
                CompactionJobStatus::Unspecified => self.unassigned += 1,
                CompactionJobStatus::InProgress
                    if max_failures > 0 && u64::from(job.failures) >= max_failures =>
                {
                    self.failed += 1
                }
                CompactionJobStatus::InProgress => self.in_progress += 1,
                CompactionJobStatus::Success => {}
            }
        }
    }

    pub(crate) fn apply_counters(&mut self, counters: &LevelCounters) {
        self.added = counters.added;
        self.assigned = counters.assigned;
        self.reassigned = counters.reassigned;
        self.completed = counters.completed;
        self.evicted = counters.evicted;
    }
}

/// Render per-level stats into Prometheus text format.
///
/// Produces one gauge family (jobs by status) and one counter family (jobs by
/// event), both labelled by `level`.
pub fn render_prometheus(stats: &[LevelStats]) -> String {
    let mut out = String::new();

    out.push_str("# HELP metastore_compaction_scheduler_queue_jobs Number of queued compaction jobs.\n");
    out.push_str("# TYPE metastore_compaction_scheduler_queue_jobs gauge\n");
    for s in stats {
        for (status, value) in [
            ("unassigned", s.unassigned),
            ("in_progress", s.in_progress),
            ("failed", s.failed),
        ] {
            out.push_str(&format!(
                "metastore_compaction_scheduler_queue_jobs{{level=\"{}\",status=\"{}\"}} {}\n",
                s.level, status, value
            ));
        }
    }

    out.push_str("# HELP metastore_compaction_scheduler_jobs_total Compaction job events applied by the scheduler.\n");
    out.push_str("# TYPE metastore_compaction_scheduler_jobs_total counter\n");
    for s in stats {
        for (event, value) in [
            ("added", s.added),
            ("assigned", s.assigned),
            ("reassigned", s.reassigned),
            ("completed", s.completed),
            ("evicted", s.evicted),
        ] {
            out.push_str(&format!(
                "metastore_compaction_scheduler_jobs_total{{level=\"{}\",event=\"{}\"}} {}\n",
                s.level, event, value
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Should still have type declarations.
        assert!(output.contains("# TYPE metastore_compaction_scheduler_queue_jobs gauge"));
        assert!(output.contains("# TYPE metastore_compaction_scheduler_jobs_total counter"));
    }

    #[test]
    fn render_levels() {
        let stats = vec![
            LevelStats {
                level: 0,
                unassigned: 4,
                in_progress: 2,
                failed: 1,
                added: 10,
                assigned: 5,
                reassigned: 1,
                completed: 3,
                evicted: 0,
            },
            LevelStats {
                level: 1,
                ..Default::default()
            },
        ];
        let output = render_prometheus(&stats);

        assert!(output.contains(
            "metastore_compaction_scheduler_queue_jobs{level=\"0\",status=\"unassigned\"} 4"
        ));
        assert!(output.contains(
            "metastore_compaction_scheduler_queue_jobs{level=\"0\",status=\"failed\"} 1"
        ));
        assert!(output.contains(
            "metastore_compaction_scheduler_jobs_total{level=\"0\",event=\"added\"} 10"
        ));
        assert!(output.contains(
            "metastore_compaction_scheduler_jobs_total{level=\"1\",event=\"completed\"} 0"
        ));
    }

    #[test]
    fn failure_threshold_splits_in_progress() {
        let jobs = [
            CompactionJobState {
                status: CompactionJobStatus::InProgress,
                failures: 3,
                ..Default::default()
            },
            CompactionJobState {
                status: CompactionJobStatus::InProgress,
                failures: 1,
                ..Default::default()
            },
        ];

        let mut stats = LevelStats::default();
        stats.count_jobs(jobs.iter(), 3);
        assert_eq!((stats.in_progress, stats.failed), (1, 1));

        let mut unlimited = LevelStats::default();
        unlimited.count_jobs(jobs.iter(), 0);
        assert_eq!((unlimited.in_progress, unlimited.failed), (2, 0));
    }
}
