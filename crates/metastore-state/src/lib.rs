//! metastore-state — persisted compaction job records.
//!
//! Backed by [redb](https://docs.rs/redb). Two tables keyed by job name hold
//! the immutable job plans and the mutable job states; values are
//! JSON-serialized into redb's `&[u8]` value columns.
//!
//! # Architecture
//!
//! The scheduler depends on the [`JobStore`] trait only. Every operation
//! takes the caller's transaction and never commits it, so a plan update is
//! persisted atomically with the Raft apply step that produced it.
//! [`StateStore`] is the redb implementation (`Tx = redb::WriteTransaction`);
//! it is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{JobStore, StateStore};
pub use types::*;
