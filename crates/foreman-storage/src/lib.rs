//! # Foreman Storage
//!
//! The single source of truth: workflows, phases and events persisted in an
//! embedded SQLite database with WAL, plus the append-only ndjson event
//! journal. All writes serialize through one writer connection; reads run
//! concurrently on a separate pool.

pub mod journal;
pub mod migrations;
pub mod models;
pub mod store;

pub use journal::{replay, EventJournal, ReplayedState};
pub use store::{MetricsAggregate, StateStore, StoreError, TransitionChanges};
