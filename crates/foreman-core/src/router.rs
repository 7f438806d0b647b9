// Phase routing
//
// The router maps a routing key (phase, kind, model set, tags) to a
// provider+model decision through an ordered rule list from configuration.
// First matching predicate wins; a default is mandatory. The router is
// pure: no I/O, and decisions are cached by routing key.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ForemanError, Result};
use crate::phase::PhaseName;
use crate::workflow::{ModelSet, WorkflowKind};

/// How multiple provider answers are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusStrategy {
    #[serde(rename = "majority-vote")]
    MajorityVote,
    #[serde(rename = "best-of-n")]
    BestOfN,
    #[serde(rename = "synthesize")]
    Synthesize,
}

impl std::fmt::Display for ConsensusStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusStrategy::MajorityVote => f.write_str("majority-vote"),
            ConsensusStrategy::BestOfN => f.write_str("best-of-n"),
            ConsensusStrategy::Synthesize => f.write_str("synthesize"),
        }
    }
}

/// The routing outcome for one phase execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub use_consensus: bool,
    #[serde(default)]
    pub consensus_strategy: Option<ConsensusStrategy>,
    #[serde(default)]
    pub consensus_providers: Option<Vec<String>>,
}

/// What a rule matches on. Empty fields match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePredicate {
    #[serde(default)]
    pub phase: Option<PhaseName>,
    #[serde(default)]
    pub kind: Option<WorkflowKind>,
    #[serde(default)]
    pub model_set: Option<ModelSet>,
    /// All listed tags must be present on the workflow
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl RoutePredicate {
    fn matches(&self, key: &RoutingKey) -> bool {
        if let Some(phase) = self.phase {
            if phase != key.phase {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if kind != key.kind {
                return false;
            }
        }
        if let Some(model_set) = self.model_set {
            if model_set != key.model_set {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.iter().all(|t| key.tags.contains(t)) {
                return false;
            }
        }
        true
    }
}

/// One ordered rule: predicate, then decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRule {
    pub when: RoutePredicate,
    pub then: RoutingDecision,
}

/// The inputs a routing decision depends on
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingKey {
    pub phase: PhaseName,
    pub kind: WorkflowKind,
    pub model_set: ModelSet,
    pub tags: Vec<String>,
}

impl RoutingKey {
    pub fn new(phase: PhaseName, kind: WorkflowKind, model_set: ModelSet, tags: &[String]) -> Self {
        let mut tags = tags.to_vec();
        tags.sort();
        Self {
            phase,
            kind,
            model_set,
            tags,
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.phase,
            self.kind,
            self.model_set,
            self.tags.join(",")
        )
    }
}

/// First-match-wins rule router with a decision cache
pub struct Router {
    rules: Vec<RouterRule>,
    default: RoutingDecision,
    cache: Mutex<HashMap<String, RoutingDecision>>,
}

impl Router {
    /// Build a router. A default decision is mandatory.
    pub fn new(rules: Vec<RouterRule>, default: Option<RoutingDecision>) -> Result<Self> {
        let default = default
            .ok_or_else(|| ForemanError::validation("router configuration requires a default"))?;
        Ok(Self {
            rules,
            default,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve the decision for a key. Pure; cached by key.
    pub fn decide(&self, key: &RoutingKey) -> RoutingDecision {
        let cache_key = key.cache_key();
        if let Some(decision) = self.cache.lock().get(&cache_key) {
            return decision.clone();
        }

        let decision = self
            .rules
            .iter()
            .find(|rule| rule.when.matches(key))
            .map(|rule| rule.then.clone())
            .unwrap_or_else(|| self.default.clone());

        self.cache.lock().insert(cache_key, decision.clone());
        decision
    }
}
