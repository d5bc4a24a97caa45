//! metastore-core — configuration shared by the metastore crates.

pub mod config;

pub use config::{ConfigError, MetastoreConfig, SchedulerConfig};
