// Engine operations
//
// The public surface of the orchestrator: create, start, pause, resume,
// cancel, archive, queries, health and metrics. Each started workflow gets
// one supervising task (see `executor`); the engine only keeps its cancel
// token and pause flag. Every transition commits to the store before its
// event reaches the bus, so a subscriber observing an event can always
// read the resulting row.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use foreman_core::config::ForemanConfig;
use foreman_core::{
    Event, EventBus, ForemanError, ListFilter, ProviderRegistry, Result, Router, Workflow,
    WorkflowSpec, WorkflowState,
};
use foreman_storage::{StateStore, TransitionChanges};

use crate::collaborators::{IssueSource, TestRunner, Workspace};
use crate::cost::CostTracker;
use crate::executor;
use crate::health::{ComponentHealth, HealthSnapshot, MetricsSnapshot};
use crate::ports::{PortAllocator, PortKind};

pub(crate) struct WorkflowHandle {
    pub cancel: CancellationToken,
    pub pause: watch::Sender<bool>,
    pub cancel_reason: Mutex<Option<String>>,
}

pub(crate) struct EngineInner {
    pub store: StateStore,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ProviderRegistry>,
    pub router: Router,
    pub config: ForemanConfig,
    pub cost: CostTracker,
    pub ports: PortAllocator,
    pub limiters: HashMap<String, Arc<Semaphore>>,
    pub issue_source: Option<Arc<dyn IssueSource>>,
    pub workspace: Option<Arc<dyn Workspace>>,
    pub test_runner: Option<Arc<dyn TestRunner>>,
    pub active: Mutex<HashMap<String, Arc<WorkflowHandle>>>,
}

/// Builder wiring the engine's dependencies and collaborators
pub struct EngineBuilder {
    store: StateStore,
    bus: Arc<EventBus>,
    registry: Arc<ProviderRegistry>,
    router: Router,
    config: ForemanConfig,
    issue_source: Option<Arc<dyn IssueSource>>,
    workspace: Option<Arc<dyn Workspace>>,
    test_runner: Option<Arc<dyn TestRunner>>,
}

impl EngineBuilder {
    pub fn new(
        store: StateStore,
        bus: Arc<EventBus>,
        registry: Arc<ProviderRegistry>,
        router: Router,
        config: ForemanConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            router,
            config,
            issue_source: None,
            workspace: None,
            test_runner: None,
        }
    }

    /// Replace the router (used by tests wiring consensus decisions).
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn issue_source(mut self, issue_source: Arc<dyn IssueSource>) -> Self {
        self.issue_source = Some(issue_source);
        self
    }

    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn test_runner(mut self, test_runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = Some(test_runner);
        self
    }

    pub fn build(self) -> Engine {
        let limiters = self
            .config
            .providers
            .iter()
            .filter_map(|(name, provider)| {
                provider
                    .concurrency_limit
                    .map(|limit| (name.clone(), Arc::new(Semaphore::new(limit.max(1)))))
            })
            .collect();
        let ports = PortAllocator::new(self.config.engine.port_ranges);

        Engine {
            inner: Arc::new(EngineInner {
                store: self.store,
                bus: self.bus,
                registry: self.registry,
                router: self.router,
                config: self.config,
                cost: CostTracker::new(),
                ports,
                limiters,
                issue_source: self.issue_source,
                workspace: self.workspace,
                test_runner: self.test_runner,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// The workflow engine
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Persist a new workflow in `created` and announce it.
    pub async fn create(&self, spec: WorkflowSpec) -> Result<Workflow> {
        spec.validate()?;
        let mut workflow = Workflow::new(spec);
        if workflow.budget_usd.is_none() {
            workflow.budget_usd = self.inner.config.budgets.default_usd;
        }

        self.inner.store.create_workflow(&workflow).await?;
        self.persist_and_publish(Event::workflow_created(&workflow.id))
            .await?;
        info!(workflow_id = %workflow.id, kind = %workflow.kind, "workflow created");
        Ok(workflow)
    }

    /// Move `created|initialized -> running` and begin phase execution.
    pub async fn start(&self, id: &str) -> Result<Workflow> {
        let workflow = self.inner.store.get_workflow(id).await?;
        if !matches!(
            workflow.state,
            WorkflowState::Created | WorkflowState::Initialized
        ) {
            return Err(ForemanError::InvalidTransition {
                from: workflow.state,
                to: WorkflowState::Running,
            });
        }

        let workflow = self
            .transition(id, workflow.state, WorkflowState::Running, Default::default())
            .await?;
        self.spawn_supervisor(id.to_string());
        Ok(workflow)
    }

    /// Request a cooperative pause; honored at the next phase boundary,
    /// never mid-provider-call.
    pub async fn pause(&self, id: &str) -> Result<()> {
        let workflow = self.inner.store.get_workflow(id).await?;
        workflow.state.check_transition(WorkflowState::Paused)?;

        let handle = self.inner.active.lock().get(id).cloned();
        match handle {
            Some(handle) => {
                let _ = handle.pause.send(true);
                Ok(())
            }
            None => {
                // no live supervisor (post-restart); transition directly
                self.transition(id, workflow.state, WorkflowState::Paused, Default::default())
                    .await?;
                self.persist_and_publish(Event::workflow_paused(id)).await?;
                Ok(())
            }
        }
    }

    /// Resume a paused (or stuck) workflow from its next incomplete phase.
    pub async fn resume(&self, id: &str) -> Result<Workflow> {
        let workflow = self.inner.store.get_workflow(id).await?;
        if !matches!(workflow.state, WorkflowState::Paused | WorkflowState::Stuck) {
            return Err(ForemanError::InvalidTransition {
                from: workflow.state,
                to: WorkflowState::Running,
            });
        }

        let resumed = self
            .transition(id, workflow.state, WorkflowState::Running, Default::default())
            .await?;
        self.persist_and_publish(Event::workflow_resumed(id)).await?;
        self.inner
            .cost
            .seed(id, resumed.cost_usd, resumed.total_tokens);
        self.spawn_supervisor(id.to_string());
        Ok(resumed)
    }

    /// Request cooperative cancellation. In-flight provider calls observe
    /// the token; the supervisor finalizes once they return.
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<()> {
        let workflow = self.inner.store.get_workflow(id).await?;
        workflow.state.check_transition(WorkflowState::Cancelled)?;

        let handle = self.inner.active.lock().get(id).cloned();
        match handle {
            Some(handle) => {
                *handle.cancel_reason.lock() = Some(reason.to_string());
                handle.cancel.cancel();
                info!(workflow_id = %id, reason = %reason, "cancellation requested");
                Ok(())
            }
            None => {
                // nothing in flight; finalize immediately
                self.transition(
                    id,
                    workflow.state,
                    WorkflowState::Cancelled,
                    TransitionChanges::with_error(130, reason),
                )
                .await?;
                self.persist_and_publish(Event::workflow_cancelled(id, reason))
                    .await?;
                executor::release_resources(self, id).await;
                Ok(())
            }
        }
    }

    /// Archive a terminal workflow. Idempotent; cascades deletion of its
    /// phases and events.
    pub async fn archive(&self, id: &str) -> Result<Workflow> {
        let workflow = self.inner.store.get_workflow(id).await?;
        if workflow.state == WorkflowState::Archived {
            return Ok(workflow);
        }
        workflow.state.check_transition(WorkflowState::Archived)?;

        let from = workflow.state;
        let archived = self.inner.store.archive_workflow(id).await?;
        // archived workflows keep no event rows; bus subscribers (and the
        // journal) still see the announcement
        self.inner
            .bus
            .publish(Event::state_changed(id, from, WorkflowState::Archived));
        self.inner.bus.publish(Event::workflow_archived(id));
        Ok(archived)
    }

    pub async fn get(&self, id: &str) -> Result<Workflow> {
        Ok(self.inner.store.get_workflow(id).await?)
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Workflow>> {
        Ok(self.inner.store.list_workflows(filter).await?)
    }

    /// Ordered events for a workflow, optionally after a sequence number.
    pub async fn events(&self, id: &str, since_seq: Option<i64>) -> Result<Vec<Event>> {
        // surface NotFound for unknown ids rather than an empty stream
        self.inner.store.get_workflow(id).await?;
        Ok(self.inner.store.events_for_workflow(id, since_seq).await?)
    }

    pub async fn phases(&self, id: &str) -> Result<Vec<foreman_core::Phase>> {
        Ok(self.inner.store.list_phases(id).await?)
    }

    /// Bind one backend and one frontend port to a workflow.
    pub async fn allocate_ports(&self, id: &str) -> Result<(u16, u16)> {
        let workflow = self.inner.store.get_workflow(id).await?;
        if workflow.backend_port.is_some() || workflow.frontend_port.is_some() {
            return Err(ForemanError::validation(format!(
                "workflow {} already holds ports",
                id
            )));
        }

        let backend = self.inner.ports.allocate(PortKind::Backend, id)?;
        let frontend = match self.inner.ports.allocate(PortKind::Frontend, id) {
            Ok(port) => port,
            Err(err) => {
                self.inner.ports.release(PortKind::Backend, backend);
                return Err(err);
            }
        };

        if let Err(err) = self
            .inner
            .store
            .set_workflow_ports(id, Some(backend), Some(frontend))
            .await
        {
            self.inner.ports.release(PortKind::Backend, backend);
            self.inner.ports.release(PortKind::Frontend, frontend);
            return Err(err.into());
        }

        self.persist_and_publish(Event::resource_allocated(
            id,
            format!("backend_port {}", backend),
        ))
        .await?;
        self.persist_and_publish(Event::resource_allocated(
            id,
            format!("frontend_port {}", frontend),
        ))
        .await?;
        Ok((backend, frontend))
    }

    /// Component health for the operations surface.
    pub async fn health(&self) -> HealthSnapshot {
        let state = match self.inner.store.ping().await {
            Ok(()) => ComponentHealth::Healthy,
            Err(err) => {
                warn!(error = %err, "state store health probe failed");
                ComponentHealth::Unhealthy
            }
        };
        let events = if self.inner.bus.subscriber_count() > 0 {
            ComponentHealth::Healthy
        } else {
            // no journal or other sink attached; events are lossy
            ComponentHealth::Degraded
        };
        let registry = if self.inner.registry.is_empty() {
            ComponentHealth::Unhealthy
        } else {
            ComponentHealth::Healthy
        };
        HealthSnapshot {
            state,
            events,
            registry,
        }
    }

    /// Typed metrics snapshot.
    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        let durations = self.inner.store.completed_durations().await?;
        Ok(MetricsSnapshot {
            workflows_by_state: self.inner.store.count_by_state().await?,
            daily: self.inner.store.metrics_aggregates().await?,
            durations: crate::health::DurationPercentiles::from_samples(durations),
            active_workflows: self.inner.active.lock().len(),
        })
    }

    /// Number of workflows with a live supervising task.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Direct store access for recovery tooling and tests.
    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// The bus this engine publishes on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    // ========================================================================
    // Internals shared with the executor
    // ========================================================================

    /// Append to the store, then publish. Commit-then-publish is the
    /// ordering guarantee subscribers rely on.
    pub(crate) async fn persist_and_publish(&self, event: Event) -> Result<()> {
        let stored = self.inner.store.append_event(&event).await?;
        self.inner.bus.publish(stored);
        Ok(())
    }

    /// Validated compare-and-swap transition publishing the state-change
    /// event after commit.
    pub(crate) async fn transition(
        &self,
        id: &str,
        from: WorkflowState,
        to: WorkflowState,
        changes: TransitionChanges,
    ) -> Result<Workflow> {
        from.check_transition(to)?;
        let workflow = self
            .inner
            .store
            .transition_workflow(id, from, to, changes)
            .await?;
        self.persist_and_publish(Event::state_changed(id, from, to))
            .await?;
        Ok(workflow)
    }

    pub(crate) fn spawn_supervisor(&self, id: String) {
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let handle = Arc::new(WorkflowHandle {
            cancel: cancel.clone(),
            pause: pause_tx,
            cancel_reason: Mutex::new(None),
        });
        self.inner.active.lock().insert(id.clone(), handle);

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = executor::run_workflow(&engine, &id, cancel, pause_rx).await {
                error!(workflow_id = %id, error = %err, "workflow supervisor failed");
                executor::fail_internal(&engine, &id, &err).await;
            }
            engine.inner.active.lock().remove(&id);
        });
    }

    pub(crate) fn cancel_reason(&self, id: &str) -> String {
        self.inner
            .active
            .lock()
            .get(id)
            .and_then(|handle| handle.cancel_reason.lock().clone())
            .unwrap_or_else(|| "cancelled".to_string())
    }
}
