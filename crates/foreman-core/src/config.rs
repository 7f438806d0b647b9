// Declarative configuration
//
// The whole orchestrator is configured by one TOML document. Every section
// is optional; missing values take the documented defaults so a minimal
// deployment is `providers` + `router.default` and nothing else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForemanError, Result};
use crate::router::{ConsensusStrategy, Router, RouterRule, RoutingDecision};

/// Root configuration document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForemanConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub consensus: HashMap<String, ConsensusConfig>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
}

impl ForemanConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ForemanError::validation(format!("bad config: {}", e)))
    }

    /// Load and parse a TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ForemanError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Build the router from the `router` section. Fails when no default
    /// decision is configured.
    pub fn build_router(&self) -> Result<Router> {
        Router::new(self.router.rules.clone(), self.router.default.clone())
    }

    /// Enabled providers only.
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}

/// Per-provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub default_model: String,
    /// Cap on concurrent in-flight calls to this provider
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// `router` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub rules: Vec<RouterRule>,
    #[serde(default)]
    pub default: Option<RoutingDecision>,
}

/// One named consensus profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub providers: Vec<String>,
    pub strategy: ConsensusStrategy,
    /// Required for the `synthesize` strategy
    #[serde(default)]
    pub synthesizer: Option<SynthesizerConfig>,
    #[serde(default = "default_min_successful")]
    pub min_successful: usize,
    #[serde(default = "default_consensus_timeout")]
    pub timeout_seconds: u64,
}

impl ConsensusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Provider+model pair issuing the synthesizer call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    pub provider: String,
    pub model: String,
}

/// `state` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// `events` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    /// Size of the sync handler worker pool; 0 runs handlers inline
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Dispatches slower than this are flagged
    #[serde(default = "default_slow_handler_ms")]
    pub slow_handler_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
            max_workers: default_max_workers(),
            slow_handler_ms: default_slow_handler_ms(),
        }
    }
}

/// `engine` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    #[serde(default)]
    pub port_ranges: PortRanges,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_seconds: u64,
    /// Wall-clock cap per workflow; unlimited when absent
    #[serde(default)]
    pub workflow_timeout_seconds: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_seconds: default_stuck_threshold(),
            default_max_attempts: default_max_attempts(),
            port_ranges: PortRanges::default(),
            call_timeout_seconds: default_call_timeout(),
            phase_timeout_seconds: default_phase_timeout(),
            workflow_timeout_seconds: None,
        }
    }
}

impl EngineConfig {
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn capacity(&self) -> usize {
        (self.end - self.start + 1) as usize
    }
}

/// `engine.port_ranges` section
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRanges {
    #[serde(default = "default_backend_range")]
    pub backend: PortRange,
    #[serde(default = "default_frontend_range")]
    pub frontend: PortRange,
}

impl Default for PortRanges {
    fn default() -> Self {
        Self {
            backend: default_backend_range(),
            frontend: default_frontend_range(),
        }
    }
}

/// `budgets` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetsConfig {
    /// Budget applied to workflows that do not declare their own
    #[serde(default)]
    pub default_usd: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_min_successful() -> usize {
    2
}

fn default_consensus_timeout() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("state/workflows.db")
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("events/events.ndjson")
}

fn default_max_workers() -> usize {
    10
}

fn default_slow_handler_ms() -> u64 {
    1000
}

fn default_stuck_threshold() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_call_timeout() -> u64 {
    120
}

fn default_phase_timeout() -> u64 {
    600
}

fn default_backend_range() -> PortRange {
    PortRange {
        start: 9100,
        end: 9199,
    }
}

fn default_frontend_range() -> PortRange {
    PortRange {
        start: 9200,
        end: 9299,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [providers.claude]
        api_key_env = "ANTHROPIC_API_KEY"
        default_model = "claude-sonnet-4"
        concurrency_limit = 4
        timeout_seconds = 90

        [providers.openai]
        api_key_env = "OPENAI_API_KEY"
        default_model = "gpt-4o"
        enabled = false

        [[router.rules]]
        when = { phase = "plan", model_set = "powerful" }
        then = { provider = "claude", model = "claude-opus-4", temperature = 0.2 }

        [router.default]
        provider = "claude"
        model = "claude-sonnet-4"

        [consensus.review-panel]
        providers = ["claude", "openai"]
        strategy = "majority-vote"
        min_successful = 2
        timeout_seconds = 15

        [state]
        db_path = "/var/lib/foreman/workflows.db"

        [events]
        journal_path = "/var/lib/foreman/events.ndjson"
        max_workers = 4

        [engine]
        stuck_threshold_seconds = 1800
        default_max_attempts = 2

        [engine.port_ranges]
        backend = { start = 9100, end = 9149 }
        frontend = { start = 9200, end = 9249 }

        [budgets]
        default_usd = 5.0
    "#;

    #[test]
    fn test_parse_full_document() {
        let config = ForemanConfig::from_toml(FULL).unwrap();

        assert_eq!(config.providers.len(), 2);
        assert!(config.providers["claude"].enabled);
        assert!(!config.providers["openai"].enabled);
        assert_eq!(config.enabled_providers().count(), 1);

        assert_eq!(config.router.rules.len(), 1);
        let router = config.build_router().unwrap();
        let decision = router.decide(&crate::router::RoutingKey::new(
            crate::phase::PhaseName::Plan,
            crate::workflow::WorkflowKind::Standard,
            crate::workflow::ModelSet::Powerful,
            &[],
        ));
        assert_eq!(decision.model, "claude-opus-4");

        let consensus = &config.consensus["review-panel"];
        assert_eq!(consensus.strategy, ConsensusStrategy::MajorityVote);
        assert_eq!(consensus.timeout(), Duration::from_secs(15));

        assert_eq!(config.engine.stuck_threshold_seconds, 1800);
        assert_eq!(config.engine.port_ranges.backend.capacity(), 50);
        assert_eq!(config.budgets.default_usd, Some(5.0));
    }

    #[test]
    fn test_defaults() {
        let config = ForemanConfig::from_toml("").unwrap();
        assert_eq!(config.state.db_path, PathBuf::from("state/workflows.db"));
        assert_eq!(config.events.max_workers, 10);
        assert_eq!(config.engine.default_max_attempts, 3);
        assert_eq!(config.engine.call_timeout_seconds, 120);
        assert_eq!(config.engine.phase_timeout_seconds, 600);
        assert_eq!(config.engine.port_ranges.backend.start, 9100);
        assert_eq!(config.engine.port_ranges.frontend.end, 9299);
        assert!(config.engine.workflow_timeout_seconds.is_none());
        assert!(config.budgets.default_usd.is_none());
        // no default decision configured -> router construction fails
        assert!(config.build_router().is_err());
    }

    #[test]
    fn test_bad_toml_is_validation_error() {
        let err = ForemanConfig::from_toml("providers = 3").unwrap_err();
        assert!(matches!(err, ForemanError::Validation(_)));
    }
}
