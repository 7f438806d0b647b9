// Phase execution
//
// One supervising task per workflow runs this loop: pick the next phase
// from the kind's plan, execute it with retry and backoff, honor pause at
// phase boundaries and the cancel token at every suspension point, and
// drive the workflow to its terminal state.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foreman_core::provider::{ChatMessage, ProviderError, ProviderRequest, ProviderResponse};
use foreman_core::router::RoutingDecision;
use foreman_core::{
    Event, ForemanError, Phase, PhaseName, PhaseState, Result, RetryPolicy, RoutingKey, Workflow,
    WorkflowState,
};
use foreman_storage::TransitionChanges;

use crate::consensus::{self, ConsensusSpec};
use crate::engine::{Engine, EngineInner};
use crate::ports::PortKind;

enum PhaseFate {
    Completed,
    Skipped,
    Cancelled,
    WorkflowFailed { message: String },
}

struct AttemptSuccess {
    text: Option<String>,
    exit_code: Option<i32>,
}

enum AttemptError {
    Cancelled,
    Failed {
        error: ForemanError,
        exit_code: Option<i32>,
        retry_after: Option<Duration>,
    },
}

impl AttemptError {
    fn failed(error: ForemanError) -> Self {
        AttemptError::Failed {
            error,
            exit_code: None,
            retry_after: None,
        }
    }
}

/// The supervising loop for one workflow.
pub(crate) async fn run_workflow(
    engine: &Engine,
    workflow_id: &str,
    cancel: CancellationToken,
    pause_rx: watch::Receiver<bool>,
) -> Result<()> {
    let inner = &engine.inner;
    let workflow = inner.store.get_workflow(workflow_id).await?;
    inner
        .cost
        .seed(workflow_id, workflow.cost_usd, workflow.total_tokens);

    let workflow = prepare_worktree(engine, workflow).await;
    let plan = workflow.kind.phase_plan();
    let mut context = rebuild_context(inner, workflow_id).await?;
    let deadline = workflow_deadline(&workflow, inner);

    for (index, name) in plan.iter().copied().enumerate() {
        let phases = inner.store.list_phases(workflow_id).await?;
        if phases
            .iter()
            .any(|p| p.name == name && matches!(p.state, PhaseState::Completed | PhaseState::Skipped))
        {
            continue;
        }

        if cancel.is_cancelled() {
            return finalize_cancelled(engine, workflow_id).await;
        }
        if *pause_rx.borrow() {
            return finalize_paused(engine, workflow_id).await;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return finalize_failed(engine, workflow_id, "workflow timed out").await;
            }
        }

        let attempt_base = phases
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.attempt)
            .max()
            .unwrap_or(0);

        let fate = execute_phase(
            engine,
            &workflow,
            name,
            index as u32,
            attempt_base,
            &mut context,
            &cancel,
        )
        .await?;

        match fate {
            PhaseFate::Completed | PhaseFate::Skipped => continue,
            PhaseFate::Cancelled => return finalize_cancelled(engine, workflow_id).await,
            PhaseFate::WorkflowFailed { message } => {
                return finalize_failed(engine, workflow_id, &message).await;
            }
        }
    }

    let workflow = engine
        .transition(
            workflow_id,
            WorkflowState::Running,
            WorkflowState::Completed,
            TransitionChanges {
                exit_code: Some(0),
                error_message: None,
            },
        )
        .await?;
    info!(workflow_id = %workflow_id, cost_usd = workflow.cost_usd, "workflow completed");
    release_resources(engine, workflow_id).await;
    notify_issue(engine, &workflow).await;
    Ok(())
}

/// Run one named phase to a terminal phase state, retrying transient
/// failures with exponential backoff and full jitter.
async fn execute_phase(
    engine: &Engine,
    workflow: &Workflow,
    name: PhaseName,
    index: u32,
    attempt_base: u32,
    context: &mut Vec<(PhaseName, String)>,
    cancel: &CancellationToken,
) -> Result<PhaseFate> {
    let inner = &engine.inner;
    let policy = RetryPolicy::exponential()
        .with_max_attempts(inner.config.engine.default_max_attempts);
    let phase_deadline = Instant::now() + inner.config.engine.phase_timeout();
    let workflow_id = workflow.id.as_str();

    let mut attempt = attempt_base + 1;
    loop {
        let phase = Phase::pending(workflow_id, name, index, attempt, policy.max_attempts);
        inner.store.insert_phase(&phase).await?;
        inner
            .store
            .mark_phase_running(workflow_id, name, attempt)
            .await?;
        engine
            .persist_and_publish(Event::phase_started(workflow_id, name))
            .await?;

        let result = run_attempt(engine, workflow, name, attempt, context, cancel, phase_deadline).await;

        match result {
            Ok(success) => {
                inner
                    .store
                    .finish_phase(
                        workflow_id,
                        name,
                        attempt,
                        PhaseState::Completed,
                        success.exit_code,
                        None,
                    )
                    .await?;
                let mut event = Event::phase_completed(workflow_id, name);
                if let Some(text) = &success.text {
                    event = event.with_metadata(serde_json::json!({ "output": text }));
                }
                engine.persist_and_publish(event).await?;
                if let Some(text) = success.text {
                    context.push((name, text));
                }
                return Ok(PhaseFate::Completed);
            }
            Err(AttemptError::Cancelled) => {
                inner
                    .store
                    .finish_phase(
                        workflow_id,
                        name,
                        attempt,
                        PhaseState::Failed,
                        None,
                        Some("cancelled"),
                    )
                    .await?;
                engine
                    .persist_and_publish(Event::phase_failed(workflow_id, name, "cancelled"))
                    .await?;
                return Ok(PhaseFate::Cancelled);
            }
            Err(AttemptError::Failed {
                error,
                exit_code,
                retry_after,
            }) => {
                let message = error.detail();
                inner
                    .store
                    .finish_phase(
                        workflow_id,
                        name,
                        attempt,
                        PhaseState::Failed,
                        exit_code,
                        Some(message.as_str()),
                    )
                    .await?;
                engine
                    .persist_and_publish(Event::phase_failed(workflow_id, name, message.clone()))
                    .await?;

                let retryable = error.is_transient()
                    && policy.has_attempts_remaining(attempt)
                    && Instant::now() < phase_deadline;
                if retryable {
                    inner.store.increment_retry_count(workflow_id).await?;
                    let delay = policy
                        .delay_for_attempt(attempt + 1)
                        .max(retry_after.unwrap_or(Duration::ZERO));
                    info!(
                        workflow_id = %workflow_id,
                        phase = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying phase after transient failure"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(PhaseFate::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                    continue;
                }

                if name.is_optional() {
                    // record the skip as its own attempt row
                    let skip = Phase::pending(
                        workflow_id,
                        name,
                        index,
                        attempt + 1,
                        policy.max_attempts,
                    );
                    inner.store.insert_phase(&skip).await?;
                    inner
                        .store
                        .skip_phase(workflow_id, name, attempt + 1, "optional phase skipped")
                        .await?;
                    warn!(workflow_id = %workflow_id, phase = %name, "optional phase skipped");
                    return Ok(PhaseFate::Skipped);
                }

                return Ok(PhaseFate::WorkflowFailed { message });
            }
        }
    }
}

/// One attempt: route, check budget, call provider(s) or the test runner,
/// apply usage deltas.
async fn run_attempt(
    engine: &Engine,
    workflow: &Workflow,
    name: PhaseName,
    attempt: u32,
    context: &[(PhaseName, String)],
    cancel: &CancellationToken,
    phase_deadline: Instant,
) -> std::result::Result<AttemptSuccess, AttemptError> {
    let inner = &engine.inner;

    // verify phases consult the test runner only
    if matches!(name, PhaseName::VerifyRed | PhaseName::VerifyGreen) {
        let exit_code = run_tests(engine, workflow, cancel).await?;
        let _ = inner.store.touch_workflow(&workflow.id).await;
        return match (name, exit_code) {
            (PhaseName::VerifyRed, 0) => Err(AttemptError::Failed {
                error: ForemanError::permanent("tests unexpectedly passed in red phase"),
                exit_code: Some(0),
                retry_after: None,
            }),
            (PhaseName::VerifyRed, code) => Ok(AttemptSuccess {
                text: None,
                exit_code: Some(code),
            }),
            (PhaseName::VerifyGreen, 0) => Ok(AttemptSuccess {
                text: None,
                exit_code: Some(0),
            }),
            (PhaseName::VerifyGreen, code) => Err(AttemptError::Failed {
                error: ForemanError::permanent("tests failed in green phase"),
                exit_code: Some(code),
                retry_after: None,
            }),
            _ => unreachable!(),
        };
    }

    let key = RoutingKey::new(name, workflow.kind, workflow.model_set, &workflow.tags);
    let decision = inner.router.decide(&key);
    let request = build_request(&decision, workflow, name, context);

    // budget projection before the call goes out
    let projected = project_cost(inner, &decision, &request);
    inner
        .cost
        .check_budget(&workflow.id, workflow.budget_usd, projected)
        .map_err(AttemptError::failed)?;

    let remaining = phase_deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(AttemptError::failed(ForemanError::transient(
            "phase timed out",
        )));
    }
    let call_timeout = inner.config.engine.call_timeout().min(remaining);

    let call = |provider: String, request: ProviderRequest| {
        let engine = engine.clone();
        let workflow_id = workflow.id.clone();
        let cancel = cancel.clone();
        async move {
            let response =
                call_provider(&engine.inner, &provider, request, &cancel, call_timeout).await?;
            record_usage(&engine, &workflow_id, name, attempt, &response).await;
            Ok(response)
        }
    };

    let response = if decision.use_consensus {
        let spec = resolve_consensus(inner, &decision).map_err(AttemptError::failed)?;
        consensus::run(&spec, &request, call).await.map_err(|error| {
            if cancel.is_cancelled() {
                AttemptError::Cancelled
            } else {
                AttemptError::failed(error)
            }
        })?
        .response
    } else {
        call(decision.provider.clone(), request)
            .await
            .map_err(|error| match error {
                ProviderError::Cancelled => AttemptError::Cancelled,
                ProviderError::RateLimited { retry_after } => AttemptError::Failed {
                    error: ProviderError::RateLimited { retry_after }.into(),
                    exit_code: None,
                    retry_after,
                },
                other => AttemptError::failed(other.into()),
            })?
    };

    // the standard test phase also runs the suite when a runner is wired
    if name == PhaseName::Test && inner.test_runner.is_some() {
        let exit_code = run_tests(engine, workflow, cancel).await?;
        if exit_code != 0 {
            return Err(AttemptError::Failed {
                error: ForemanError::permanent("tests failed"),
                exit_code: Some(exit_code),
                retry_after: None,
            });
        }
    }

    Ok(AttemptSuccess {
        text: Some(response.text),
        exit_code: Some(0),
    })
}

async fn run_tests(
    engine: &Engine,
    workflow: &Workflow,
    cancel: &CancellationToken,
) -> std::result::Result<i32, AttemptError> {
    let runner = engine.inner.test_runner.as_ref().ok_or_else(|| {
        AttemptError::failed(ForemanError::permanent(
            "no test runner configured; verify phases require one",
        ))
    })?;
    let worktree = workflow
        .worktree_path
        .clone()
        .unwrap_or_else(|| ".".to_string());

    tokio::select! {
        _ = cancel.cancelled() => Err(AttemptError::Cancelled),
        result = runner.run(Path::new(&worktree)) => result.map_err(|err| {
            AttemptError::failed(ForemanError::permanent(format!("test runner failed: {}", err)))
        }),
    }
}

/// Registry lookup + per-provider concurrency cap + call timeout.
pub(crate) async fn call_provider(
    inner: &EngineInner,
    provider: &str,
    request: ProviderRequest,
    cancel: &CancellationToken,
    timeout: Duration,
) -> std::result::Result<ProviderResponse, ProviderError> {
    let client = inner
        .registry
        .get(provider)
        .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown provider: {}", provider)))?;

    let _permit = match inner.limiters.get(provider) {
        Some(semaphore) => Some(
            semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ProviderError::Unavailable("provider limiter closed".to_string()))?,
        ),
        None => None,
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = tokio::time::timeout(timeout, client.execute(request, cancel)) => {
            result.unwrap_or(Err(ProviderError::Timeout(timeout)))
        }
    }
}

/// Write usage through to phase and workflow rows and the in-memory
/// tracker. Best-effort: accounting failures are logged, not fatal.
async fn record_usage(
    engine: &Engine,
    workflow_id: &str,
    name: PhaseName,
    attempt: u32,
    response: &ProviderResponse,
) {
    let tokens = (response.tokens_in + response.tokens_out) as u64;
    engine.inner.cost.record(workflow_id, response.cost_usd, tokens);
    if let Err(err) = engine
        .inner
        .store
        .add_phase_usage(
            workflow_id,
            name,
            attempt,
            1,
            response.tokens_in as u64,
            response.tokens_out as u64,
            response.cost_usd,
        )
        .await
    {
        warn!(workflow_id = %workflow_id, error = %err, "phase usage write failed");
    }
    if let Err(err) = engine
        .inner
        .store
        .add_workflow_usage(workflow_id, response.cost_usd, tokens)
        .await
    {
        warn!(workflow_id = %workflow_id, error = %err, "workflow usage write failed");
    }
}

fn project_cost(inner: &EngineInner, decision: &RoutingDecision, request: &ProviderRequest) -> f64 {
    let Some(client) = inner.registry.get(&decision.provider) else {
        return 0.0;
    };
    let tokens_out = request.max_tokens.unwrap_or(1024);
    client.cost_estimate(request.estimated_tokens_in(), tokens_out, &request.model)
}

/// Resolve the full consensus parameters: providers and strategy from the
/// routing decision, quorum/timeout/synthesizer from the first matching
/// configured profile (defaults otherwise).
fn resolve_consensus(inner: &EngineInner, decision: &RoutingDecision) -> Result<ConsensusSpec> {
    let providers = decision
        .consensus_providers
        .clone()
        .ok_or_else(|| ForemanError::validation("consensus requested without providers"))?;
    let strategy = decision
        .consensus_strategy
        .ok_or_else(|| ForemanError::validation("consensus requested without a strategy"))?;

    let profile = inner
        .config
        .consensus
        .values()
        .find(|profile| profile.strategy == strategy && profile.providers == providers);

    let (min_successful, timeout, synthesizer) = match profile {
        Some(profile) => (
            profile.min_successful,
            profile.timeout(),
            profile
                .synthesizer
                .as_ref()
                .map(|s| (s.provider.clone(), s.model.clone())),
        ),
        None => (2, Duration::from_secs(30), None),
    };

    let participants = providers
        .iter()
        .map(|provider| {
            let model = if *provider == decision.provider {
                decision.model.clone()
            } else {
                inner
                    .config
                    .providers
                    .get(provider)
                    .map(|p| p.default_model.clone())
                    .unwrap_or_else(|| decision.model.clone())
            };
            (provider.clone(), model)
        })
        .collect();

    Ok(ConsensusSpec {
        participants,
        strategy,
        min_successful,
        timeout,
        synthesizer,
    })
}

fn build_request(
    decision: &RoutingDecision,
    workflow: &Workflow,
    name: PhaseName,
    context: &[(PhaseName, String)],
) -> ProviderRequest {
    let mut body = format!("# Task\n{}\n", workflow.task);
    for (phase, output) in context {
        body.push_str(&format!("\n## {} output\n{}\n", phase, output));
    }
    body.push_str(&format!("\n{}\n", phase_instruction(name)));

    ProviderRequest {
        model: decision.model.clone(),
        messages: vec![
            ChatMessage::system(phase_system_prompt(name)),
            ChatMessage::user(body),
        ],
        max_tokens: decision.max_tokens,
        temperature: decision.temperature,
        stop: None,
    }
}

fn phase_system_prompt(name: PhaseName) -> &'static str {
    match name {
        PhaseName::Plan => {
            "You are a senior engineer. Break the task into a concrete, ordered implementation plan."
        }
        PhaseName::Build => {
            "You are a senior engineer. Implement the planned change; output the code."
        }
        PhaseName::Test => "You are a test engineer. Write tests covering the change.",
        PhaseName::Review => {
            "You are a code reviewer. Review the change for correctness and style."
        }
        PhaseName::Deploy => "You are a release engineer. Produce the deployment steps.",
        PhaseName::GenerateTests => {
            "You are a test engineer practicing TDD. Write tests that fail until the task is implemented."
        }
        PhaseName::Refactor => {
            "You are a senior engineer. Refactor the implementation without changing behavior."
        }
        // verify phases never reach a provider
        PhaseName::VerifyRed | PhaseName::VerifyGreen => "",
    }
}

fn phase_instruction(name: PhaseName) -> &'static str {
    match name {
        PhaseName::Plan => "Produce the implementation plan.",
        PhaseName::Build => "Produce the implementation.",
        PhaseName::Test => "Produce the tests.",
        PhaseName::Review => "Produce the review verdict and findings.",
        PhaseName::Deploy => "Produce the deployment steps.",
        PhaseName::GenerateTests => "Produce the failing tests.",
        PhaseName::Refactor => "Produce the refactored implementation.",
        PhaseName::VerifyRed | PhaseName::VerifyGreen => "",
    }
}

/// Rebuild the cumulative prompt context from persisted phase events, so a
/// resumed workflow continues with the same inputs.
async fn rebuild_context(
    inner: &EngineInner,
    workflow_id: &str,
) -> Result<Vec<(PhaseName, String)>> {
    let events = inner.store.events_for_workflow(workflow_id, None).await?;
    let mut context = Vec::new();
    for event in events {
        if event.event_type == foreman_core::EventType::PhaseCompleted {
            if let (Some(name), Some(metadata)) = (event.phase_name, &event.metadata) {
                if let Some(output) = metadata.get("output").and_then(|v| v.as_str()) {
                    context.push((name, output.to_string()));
                }
            }
        }
    }
    Ok(context)
}

fn workflow_deadline(workflow: &Workflow, inner: &EngineInner) -> Option<Instant> {
    let timeout = inner.config.engine.workflow_timeout_seconds?;
    let elapsed = (chrono::Utc::now() - workflow.started_at.unwrap_or(workflow.created_at))
        .to_std()
        .unwrap_or(Duration::ZERO);
    Some(Instant::now() + Duration::from_secs(timeout).saturating_sub(elapsed))
}

async fn prepare_worktree(engine: &Engine, workflow: Workflow) -> Workflow {
    let inner = &engine.inner;
    let Some(workspace) = &inner.workspace else {
        return workflow;
    };
    if workflow.worktree_path.is_some() {
        return workflow;
    }

    let branch = workflow
        .branch
        .clone()
        .unwrap_or_else(|| format!("foreman/{}", workflow.id));
    match workspace.create_worktree(&branch, &workflow.base_branch).await {
        Ok(path) => {
            let path = path.to_string_lossy().to_string();
            if let Err(err) = inner
                .store
                .set_workflow_worktree(&workflow.id, &branch, &path)
                .await
            {
                warn!(workflow_id = %workflow.id, error = %err, "worktree record failed");
                return workflow;
            }
            match inner.store.get_workflow(&workflow.id).await {
                Ok(updated) => updated,
                Err(_) => workflow,
            }
        }
        Err(err) => {
            warn!(workflow_id = %workflow.id, error = %err, "worktree creation failed");
            workflow
        }
    }
}

// ============================================================================
// Finalization
// ============================================================================

async fn finalize_paused(engine: &Engine, workflow_id: &str) -> Result<()> {
    engine
        .transition(
            workflow_id,
            WorkflowState::Running,
            WorkflowState::Paused,
            Default::default(),
        )
        .await?;
    engine
        .persist_and_publish(Event::workflow_paused(workflow_id))
        .await?;
    info!(workflow_id = %workflow_id, "workflow paused at phase boundary");
    Ok(())
}

async fn finalize_cancelled(engine: &Engine, workflow_id: &str) -> Result<()> {
    let reason = engine.cancel_reason(workflow_id);
    let workflow = engine
        .transition(
            workflow_id,
            WorkflowState::Running,
            WorkflowState::Cancelled,
            TransitionChanges::with_error(130, reason.clone()),
        )
        .await?;
    engine
        .persist_and_publish(Event::workflow_cancelled(workflow_id, reason))
        .await?;
    release_resources(engine, workflow_id).await;
    notify_issue(engine, &workflow).await;
    Ok(())
}

async fn finalize_failed(engine: &Engine, workflow_id: &str, message: &str) -> Result<()> {
    let workflow = engine
        .transition(
            workflow_id,
            WorkflowState::Running,
            WorkflowState::Failed,
            TransitionChanges::with_error(1, message),
        )
        .await?;
    warn!(workflow_id = %workflow_id, error = %message, "workflow failed");
    release_resources(engine, workflow_id).await;
    notify_issue(engine, &workflow).await;
    Ok(())
}

/// Mark a workflow failed after an internal (invariant) error.
pub(crate) async fn fail_internal(engine: &Engine, workflow_id: &str, err: &ForemanError) {
    let _ = engine
        .persist_and_publish(Event::error_occurred(workflow_id, err.to_string()))
        .await;
    if let Ok(workflow) = engine.inner.store.get_workflow(workflow_id).await {
        if workflow.state == WorkflowState::Running {
            let _ = engine
                .transition(
                    workflow_id,
                    WorkflowState::Running,
                    WorkflowState::Failed,
                    TransitionChanges::with_error(1, "internal"),
                )
                .await;
            release_resources(engine, workflow_id).await;
        }
    }
}

/// Release bound ports and drop in-memory accounting for a terminal
/// workflow. Idempotent.
pub(crate) async fn release_resources(engine: &Engine, workflow_id: &str) {
    let inner = &engine.inner;
    inner.cost.release(workflow_id);

    let Ok(workflow) = inner.store.get_workflow(workflow_id).await else {
        return;
    };
    if workflow.backend_port.is_none() && workflow.frontend_port.is_none() {
        return;
    }
    if let Some(port) = workflow.backend_port {
        inner.ports.release(PortKind::Backend, port);
        let _ = engine
            .persist_and_publish(Event::resource_released(
                workflow_id,
                format!("backend_port {}", port),
            ))
            .await;
    }
    if let Some(port) = workflow.frontend_port {
        inner.ports.release(PortKind::Frontend, port);
        let _ = engine
            .persist_and_publish(Event::resource_released(
                workflow_id,
                format!("frontend_port {}", port),
            ))
            .await;
    }
    if let Err(err) = inner.store.set_workflow_ports(workflow_id, None, None).await {
        warn!(workflow_id = %workflow_id, error = %err, "port release write failed");
    }
}

/// Close the loop with the issue tracker on terminal states.
async fn notify_issue(engine: &Engine, workflow: &Workflow) {
    let (Some(issue_source), Some(issue_ref)) =
        (&engine.inner.issue_source, &workflow.issue_ref)
    else {
        return;
    };
    let latest = engine
        .inner
        .store
        .get_workflow(&workflow.id)
        .await
        .unwrap_or_else(|_| workflow.clone());
    let text = match &latest.error_message {
        Some(message) => format!("workflow `{}` {}: {}", latest.name, latest.state, message),
        None => format!("workflow `{}` {}", latest.name, latest.state),
    };
    if let Err(err) = issue_source.post_comment(issue_ref, &text).await {
        warn!(workflow_id = %workflow.id, error = %err, "issue comment failed");
    }
}
