//! metastore.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default number of attempts before a compaction job is considered failed.
pub const DEFAULT_MAX_FAILURES: u64 = 3;

/// Default lease granted to a worker for an assigned job.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);

/// Default upper bound on the number of queued compaction jobs.
pub const DEFAULT_MAX_QUEUE_SIZE: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {key}: {value:?}")]
    InvalidDuration { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetastoreConfig {
    pub data_dir: Option<PathBuf>,
    pub compaction: Option<CompactionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub scheduler: Option<SchedulerSection>,
}

/// Raw `[compaction.scheduler]` table, every key optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub max_failures: Option<u64>,
    pub lease_duration: Option<String>,
    pub max_queue_size: Option<u64>,
}

/// Resolved compaction scheduler settings.
///
/// `max_failures == 0` disables the failure threshold and
/// `max_queue_size == 0` leaves the queue unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_failures: u64,
    pub lease_duration: Duration,
    pub max_queue_size: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            lease_duration: DEFAULT_LEASE_DURATION,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl MetastoreConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the scheduler section, filling in defaults for absent keys.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let mut resolved = SchedulerConfig::default();
        let Some(section) = self.compaction.as_ref().and_then(|c| c.scheduler.as_ref()) else {
            return Ok(resolved);
        };
        if let Some(max_failures) = section.max_failures {
            resolved.max_failures = max_failures;
        }
        if let Some(raw) = &section.lease_duration {
            resolved.lease_duration =
                parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                    key: "compaction.scheduler.lease_duration",
                    value: raw.clone(),
                })?;
        }
        if let Some(max_queue_size) = section.max_queue_size {
            resolved.max_queue_size = max_queue_size;
        }
        Ok(resolved)
    }
}

/// Parse a duration string like "15s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
