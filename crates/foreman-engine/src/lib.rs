//! # Foreman Engine
//!
//! The workflow engine: a persistent state machine per workflow with
//! at-most-once transitions, retry with backoff, cooperative pause and
//! cancellation, crash recovery, consensus across providers, budget
//! enforcement and bounded resource pools.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                             │
//! │   (operations: create/start/pause/resume/cancel/archive)   │
//! └────────────────────────────────────────────────────────────┘
//!                │ one supervising task per workflow
//!                ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │  phase executor -> router -> consensus / provider client   │
//! └────────────────────────────────────────────────────────────┘
//!                │ commit-then-publish
//!                ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │             StateStore (SQLite)  +  EventBus               │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod collaborators;
pub mod consensus;
pub mod cost;
pub mod engine;
pub mod executor;
pub mod factory;
pub mod health;
pub mod ports;
pub mod reaper;
pub mod recovery;
pub mod testing;

pub use collaborators::{IssueSource, ShellTestRunner, TestRunner, Workspace};
pub use consensus::{ConsensusOutcome, ConsensusSpec};
pub use cost::CostTracker;
pub use engine::{Engine, EngineBuilder};
pub use factory::build_registry;
pub use health::{ComponentHealth, DurationPercentiles, HealthSnapshot, MetricsSnapshot};
pub use ports::PortAllocator;
