// Test doubles
//
// Scripted provider clients and collaborator fakes used by the engine's
// own tests and by downstream crates. Kept in the library (not cfg(test))
// so the API crate's tests can drive a full engine without the network.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use foreman_core::provider::{
    ProviderClient, ProviderError, ProviderRequest, ProviderResponse,
};

use crate::collaborators::{Issue, IssueSource, TestRunner, Workspace};

struct Scripted {
    delay: Option<Duration>,
    result: Result<String, ProviderError>,
}

/// Scripted provider: queued replies first, then the default reply.
/// The default mirrors the canonical test fixture: "ok", 10 tokens in,
/// 20 out, 0.0003 USD.
pub struct MockProvider {
    name: String,
    scripted: Mutex<VecDeque<Scripted>>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripted: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call waits this long (observing the cancel token) before
    /// replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a failure for the next call.
    pub fn push_error(&self, error: ProviderError) {
        self.scripted.lock().push_back(Scripted {
            delay: None,
            result: Err(error),
        });
    }

    /// Queue a specific reply text for the next call.
    pub fn push_text(&self, text: impl Into<String>) {
        self.scripted.lock().push_back(Scripted {
            delay: None,
            result: Ok(text.into()),
        });
    }

    /// Queue a reply that only arrives after the delay (or Cancelled if
    /// the token fires first).
    pub fn push_delayed(&self, text: impl Into<String>, delay: Duration) {
        self.scripted.lock().push_back(Scripted {
            delay: Some(delay),
            result: Ok(text.into()),
        });
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn response(&self, model: &str, text: String) -> ProviderResponse {
        ProviderResponse {
            provider: self.name.clone(),
            model: model.to_string(),
            text,
            tokens_in: 10,
            tokens_out: 20,
            cost_usd: 0.0003,
            latency_ms: 1,
            raw: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn execute(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.scripted.lock().pop_front();
        let (delay, result) = match scripted {
            Some(entry) => (entry.delay.or(self.delay), entry.result),
            None => (self.delay, Ok("ok".to_string())),
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        match result {
            Ok(text) => Ok(self.response(&request.model, text)),
            Err(error) => Err(error),
        }
    }

    fn cost_estimate(&self, _tokens_in: u32, _tokens_out: u32, _model: &str) -> f64 {
        0.0003
    }
}

/// Test runner returning queued exit codes, then the default.
pub struct FixedTestRunner {
    scripted: Mutex<VecDeque<i32>>,
    default: i32,
}

impl FixedTestRunner {
    pub fn always(code: i32) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            default: code,
        }
    }

    pub fn push(&self, code: i32) {
        self.scripted.lock().push_back(code);
    }
}

#[async_trait]
impl TestRunner for FixedTestRunner {
    async fn run(&self, _worktree: &Path) -> AnyResult<i32> {
        Ok(self.scripted.lock().pop_front().unwrap_or(self.default))
    }
}

/// Records comments; fetch returns a canned issue.
#[derive(Default)]
pub struct RecordingIssueSource {
    pub comments: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl IssueSource for RecordingIssueSource {
    async fn fetch(&self, issue_ref: &str) -> AnyResult<Issue> {
        Ok(Issue {
            title: format!("issue {}", issue_ref),
            body: "canned body".to_string(),
            labels: vec![],
        })
    }

    async fn post_comment(&self, issue_ref: &str, text: &str) -> AnyResult<()> {
        self.comments
            .lock()
            .push((issue_ref.to_string(), text.to_string()));
        Ok(())
    }
}

/// Workspace fake handing out paths under a root without touching git.
pub struct FakeWorkspace {
    root: PathBuf,
    pub commits: Mutex<Vec<String>>,
}

impl FakeWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            commits: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    async fn create_worktree(&self, branch: &str, _base: &str) -> AnyResult<PathBuf> {
        Ok(self.root.join(branch.replace('/', "-")))
    }

    async fn commit(&self, _path: &Path, message: &str) -> AnyResult<()> {
        self.commits.lock().push(message.to_string());
        Ok(())
    }

    async fn push(&self, _path: &Path) -> AnyResult<()> {
        Ok(())
    }

    async fn open_review(&self, branch: &str, _title: &str, _body: &str) -> AnyResult<String> {
        Ok(format!("https://review.example/{}", branch))
    }
}

/// A bare routing decision for tests.
pub fn decision(provider: &str, model: &str) -> foreman_core::router::RoutingDecision {
    foreman_core::router::RoutingDecision {
        provider: provider.to_string(),
        model: model.to_string(),
        temperature: None,
        max_tokens: None,
        use_consensus: false,
        consensus_strategy: None,
        consensus_providers: None,
    }
}

/// Registry over the given mocks.
pub fn registry_of(providers: Vec<Arc<MockProvider>>) -> Arc<foreman_core::ProviderRegistry> {
    let mut registry = foreman_core::ProviderRegistry::new();
    for provider in providers {
        registry.register(provider);
    }
    Arc::new(registry)
}

/// Builder over in-memory storage, a default bus and a single-default
/// router pointing at the first provider.
pub async fn engine_builder(
    providers: Vec<Arc<MockProvider>>,
    config: foreman_core::ForemanConfig,
) -> crate::engine::EngineBuilder {
    use foreman_core::{BusConfig, EventBus, Router};

    let store = foreman_storage::StateStore::in_memory()
        .await
        .expect("in-memory store");
    let bus = Arc::new(EventBus::new(BusConfig::default()));

    let default_provider = providers
        .first()
        .map(|p| ProviderClient::name(p.as_ref()).to_string())
        .unwrap_or_else(|| "p1".to_string());
    let registry = registry_of(providers);
    let router = Router::new(vec![], Some(decision(&default_provider, "mock-model"))).expect("router");

    crate::engine::EngineBuilder::new(store, bus, registry, router, config)
}

/// Wire a full engine over in-memory storage with the given mock
/// providers; the first provider is the router default.
pub async fn engine_with_providers(
    providers: Vec<Arc<MockProvider>>,
    config: foreman_core::ForemanConfig,
) -> crate::engine::Engine {
    engine_builder(providers, config).await.build()
}
