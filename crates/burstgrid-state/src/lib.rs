//! burstgrid-state — embedded state store for BurstGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for jobs, per-pool capacity records, and workflow execution
//! checkpoints.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns
//! and keyed by their identifier. Job updates are partial-field merges and
//! status transitions are compare-and-set inside a single write
//! transaction, so two triggers racing on the same job cannot both win.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
