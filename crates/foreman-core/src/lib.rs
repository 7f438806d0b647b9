//! # Foreman Core
//!
//! Shared abstractions for the Foreman workflow orchestrator:
//!
//! - Domain entities: [`Workflow`], [`Phase`], [`Event`]
//! - The in-process [`EventBus`] with copy-on-write dispatch
//! - The [`ProviderClient`] trait, [`ProviderRegistry`] and the pure [`Router`]
//! - [`RetryPolicy`] with exponential backoff and full jitter
//! - The declarative [`ForemanConfig`] document
//!
//! This crate has no storage or HTTP dependencies; the engine, storage and
//! API crates all build on top of it.

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod phase;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod router;
pub mod workflow;

pub use bus::{BusConfig, EventBus, EventFilter, EventHandler, SubscriptionId};
pub use config::{
    BudgetsConfig, ConsensusConfig, EngineConfig, EventsConfig, ForemanConfig, PortRange,
    ProviderConfig, RouterConfig, StateConfig, SynthesizerConfig,
};
pub use error::{ForemanError, Result};
pub use event::{Event, EventType, Severity};
pub use phase::{Phase, PhaseName, PhaseState};
pub use provider::{
    ChatMessage, ChatRole, ProviderClient, ProviderError, ProviderRequest, ProviderResponse,
};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use router::{ConsensusStrategy, RouterRule, RoutingDecision, RoutingKey, RoutePredicate, Router};
pub use workflow::{
    IssueClass, ListFilter, ModelSet, Workflow, WorkflowKind, WorkflowSpec, WorkflowState,
};
