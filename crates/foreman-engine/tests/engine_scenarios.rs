// End-to-end engine scenarios over in-memory storage and mock providers

use std::sync::Arc;
use std::time::Duration;

use foreman_core::provider::ProviderError;
use foreman_core::router::{ConsensusStrategy, RoutingDecision};
use foreman_core::{
    EventType, ForemanConfig, PhaseName, PhaseState, Router, Workflow, WorkflowKind,
    WorkflowSpec, WorkflowState,
};
use foreman_engine::testing::{
    decision, engine_builder, engine_with_providers, FixedTestRunner, MockProvider,
    RecordingIssueSource,
};
use foreman_engine::{reaper, Engine};
use foreman_storage::TransitionChanges;

fn spec(kind: WorkflowKind) -> WorkflowSpec {
    WorkflowSpec::new("X", kind, "implement the widget")
}

async fn wait_for_state(engine: &Engine, id: &str, state: WorkflowState) -> Workflow {
    for _ in 0..500 {
        let workflow = engine.get(id).await.unwrap();
        if workflow.state == state {
            return workflow;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("workflow {} never reached {}", id, state);
}

async fn wait_for_phase_state(
    engine: &Engine,
    id: &str,
    name: PhaseName,
    state: PhaseState,
) {
    for _ in 0..500 {
        let phases = engine.phases(id).await.unwrap();
        if phases.iter().any(|p| p.name == name && p.state == state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("phase {} never reached {}", name, state);
}

// Scenario 1: standard workflow happy path with exact event order and cost.
#[tokio::test]
async fn standard_workflow_happy_path() {
    let provider = Arc::new(MockProvider::new("p1"));
    let engine = engine_with_providers(vec![provider.clone()], ForemanConfig::default()).await;

    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let done = wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;

    assert_eq!(done.exit_code, Some(0));
    assert!((done.cost_usd - 0.0012).abs() < 1e-9);
    assert_eq!(done.total_tokens, 120);
    assert_eq!(provider.call_count(), 4);

    let phases = engine.phases(&workflow.id).await.unwrap();
    let names: Vec<PhaseName> = phases.iter().map(|p| p.name).collect();
    assert_eq!(
        names,
        vec![
            PhaseName::Plan,
            PhaseName::Build,
            PhaseName::Test,
            PhaseName::Review
        ]
    );
    assert!(phases.iter().all(|p| p.state == PhaseState::Completed));

    // workflow usage equals the sum over phases
    let phase_cost: f64 = phases.iter().map(|p| p.cost_usd).sum();
    assert!((done.cost_usd - phase_cost).abs() < 1e-9);

    let events = engine.events(&workflow.id, None).await.unwrap();
    let kinds: Vec<(EventType, Option<PhaseName>)> = events
        .iter()
        .map(|e| (e.event_type, e.phase_name))
        .collect();
    let expected: Vec<(EventType, Option<PhaseName>)> = vec![
        (EventType::WorkflowCreated, None),
        (EventType::WorkflowStateChanged, None),
        (EventType::PhaseStarted, Some(PhaseName::Plan)),
        (EventType::PhaseCompleted, Some(PhaseName::Plan)),
        (EventType::PhaseStarted, Some(PhaseName::Build)),
        (EventType::PhaseCompleted, Some(PhaseName::Build)),
        (EventType::PhaseStarted, Some(PhaseName::Test)),
        (EventType::PhaseCompleted, Some(PhaseName::Test)),
        (EventType::PhaseStarted, Some(PhaseName::Review)),
        (EventType::PhaseCompleted, Some(PhaseName::Review)),
        (EventType::WorkflowStateChanged, None),
    ];
    assert_eq!(kinds, expected);

    // transition events carry legal (from, to) pairs
    assert_eq!(events[1].from_state, Some(WorkflowState::Created));
    assert_eq!(events[1].to_state, Some(WorkflowState::Running));
    let last = events.last().unwrap();
    assert_eq!(last.from_state, Some(WorkflowState::Running));
    assert_eq!(last.to_state, Some(WorkflowState::Completed));

    // sequence numbers are strictly increasing
    assert!(events.windows(2).all(|pair| pair[0].seq < pair[1].seq));
}

// Scenario 2: TDD red phase inversion - passing tests fail the red phase.
#[tokio::test]
async fn tdd_red_phase_inversion() {
    let provider = Arc::new(MockProvider::new("p1"));
    let runner = Arc::new(FixedTestRunner::always(0));
    let engine = engine_builder(vec![provider], ForemanConfig::default())
        .await
        .test_runner(runner)
        .build();

    let workflow = engine.create(spec(WorkflowKind::Tdd)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let failed = wait_for_state(&engine, &workflow.id, WorkflowState::Failed).await;

    assert_eq!(
        failed.error_message.as_deref(),
        Some("tests unexpectedly passed in red phase")
    );

    let phases = engine.phases(&workflow.id).await.unwrap();
    let red = phases
        .iter()
        .find(|p| p.name == PhaseName::VerifyRed)
        .unwrap();
    assert_eq!(red.state, PhaseState::Failed);
    assert_eq!(red.exit_code, Some(0));
    // nothing after verify_red was scheduled
    assert!(!phases.iter().any(|p| p.name == PhaseName::Build));
}

// TDD happy path: red fails (good), build, green passes.
#[tokio::test]
async fn tdd_green_path() {
    let provider = Arc::new(MockProvider::new("p1"));
    let runner = Arc::new(FixedTestRunner::always(0));
    // first run is the red check: tests must fail before the build
    runner.push(1);
    let engine = engine_builder(vec![provider], ForemanConfig::default())
        .await
        .test_runner(runner)
        .build();

    let workflow = engine.create(spec(WorkflowKind::Tdd)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let done = wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;
    assert_eq!(done.exit_code, Some(0));

    let phases = engine.phases(&workflow.id).await.unwrap();
    assert_eq!(phases.len(), WorkflowKind::Tdd.phase_plan().len());
    let red = phases
        .iter()
        .find(|p| p.name == PhaseName::VerifyRed)
        .unwrap();
    assert_eq!(red.state, PhaseState::Completed);
    assert_eq!(red.exit_code, Some(1));
}

// Scenario 3: first build attempt rate-limited, second succeeds.
#[tokio::test]
async fn retry_then_succeed() {
    let provider = Arc::new(MockProvider::new("p1"));
    provider.push_text("plan output");
    provider.push_error(ProviderError::RateLimited {
        retry_after: Some(Duration::from_secs(1)),
    });
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;

    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let done = wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;
    assert_eq!(done.retry_count, 1);

    let phases = engine.phases(&workflow.id).await.unwrap();
    let build: Vec<_> = phases
        .iter()
        .filter(|p| p.name == PhaseName::Build)
        .collect();
    assert_eq!(build.len(), 2);
    assert_eq!(build[0].attempt, 1);
    assert_eq!(build[0].state, PhaseState::Failed);
    assert_eq!(build[1].attempt, 2);
    assert_eq!(build[1].state, PhaseState::Completed);

    let events = engine.events(&workflow.id, None).await.unwrap();
    let build_failed = events
        .iter()
        .filter(|e| {
            e.event_type == EventType::PhaseFailed && e.phase_name == Some(PhaseName::Build)
        })
        .count();
    let build_completed = events
        .iter()
        .filter(|e| {
            e.event_type == EventType::PhaseCompleted && e.phase_name == Some(PhaseName::Build)
        })
        .count();
    assert_eq!(build_failed, 1);
    assert_eq!(build_completed, 1);
}

// Scenario 4: consensus below quorum is transient, then exhausts retries.
#[tokio::test]
async fn consensus_quorum_failure() {
    let p1 = Arc::new(MockProvider::new("p1"));
    let p2 = Arc::new(MockProvider::new("p2"));
    let p3 = Arc::new(MockProvider::new("p3"));
    // two of three participants fail on every attempt
    for _ in 0..3 {
        p2.push_error(ProviderError::Timeout(Duration::from_secs(5)));
        p3.push_error(ProviderError::Timeout(Duration::from_secs(5)));
    }

    let consensus_decision = RoutingDecision {
        use_consensus: true,
        consensus_strategy: Some(ConsensusStrategy::MajorityVote),
        consensus_providers: Some(vec![
            "p1".to_string(),
            "p2".to_string(),
            "p3".to_string(),
        ]),
        ..decision("p1", "mock-model")
    };
    let router = Router::new(vec![], Some(consensus_decision)).unwrap();

    let engine = engine_builder(
        vec![p1.clone(), p2, p3],
        ForemanConfig::default(),
    )
    .await
    .router(router)
    .build();

    let workflow = engine.create(spec(WorkflowKind::PlanOnly)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let failed = wait_for_state(&engine, &workflow.id, WorkflowState::Failed).await;

    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("consensus below quorum"));

    let phases = engine.phases(&workflow.id).await.unwrap();
    let attempts: Vec<u32> = phases
        .iter()
        .filter(|p| p.name == PhaseName::Plan)
        .map(|p| p.attempt)
        .collect();
    // retried until max_attempts, attempts contiguous from 1
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(phases.iter().all(|p| p.state == PhaseState::Failed));

    // p1's successful responses were still recorded into usage
    assert_eq!(p1.call_count(), 3);
    assert!(failed.cost_usd > 0.0);
}

// Scenario 5: cancellation mid-provider-call.
#[tokio::test]
async fn cancellation_mid_flight() {
    let provider = Arc::new(MockProvider::new("p1"));
    provider.push_text("plan output");
    provider.push_delayed("never delivered", Duration::from_secs(30));
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;

    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    wait_for_phase_state(&engine, &workflow.id, PhaseName::Build, PhaseState::Running).await;

    let cancelled_at = std::time::Instant::now();
    engine.cancel(&workflow.id, "operator abort").await.unwrap();
    let cancelled = wait_for_state(&engine, &workflow.id, WorkflowState::Cancelled).await;
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));

    assert_eq!(cancelled.error_message.as_deref(), Some("operator abort"));
    let phases = engine.phases(&workflow.id).await.unwrap();
    let build = phases
        .iter()
        .find(|p| p.name == PhaseName::Build)
        .unwrap();
    assert_eq!(build.state, PhaseState::Failed);
    assert_eq!(build.error_message.as_deref(), Some("cancelled"));
    // no later phases were created
    assert!(!phases
        .iter()
        .any(|p| matches!(p.name, PhaseName::Test | PhaseName::Review)));

    let events = engine.events(&workflow.id, None).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::WorkflowCancelled));
}

// Scenario 6: crash recovery parks the workflow; resume re-drives it.
#[tokio::test]
async fn crash_recovery_and_resume() {
    let provider = Arc::new(MockProvider::new("p1"));
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;

    // simulate a previous process: running workflow, plan done, build
    // in flight, written directly through the store
    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    let store = engine_store(&engine);
    store
        .transition_workflow(
            &workflow.id,
            WorkflowState::Created,
            WorkflowState::Running,
            TransitionChanges::default(),
        )
        .await
        .unwrap();
    let plan = foreman_core::Phase::pending(&workflow.id, PhaseName::Plan, 0, 1, 3);
    store.insert_phase(&plan).await.unwrap();
    store
        .mark_phase_running(&workflow.id, PhaseName::Plan, 1)
        .await
        .unwrap();
    store
        .finish_phase(&workflow.id, PhaseName::Plan, 1, PhaseState::Completed, Some(0), None)
        .await
        .unwrap();
    let build = foreman_core::Phase::pending(&workflow.id, PhaseName::Build, 1, 1, 3);
    store.insert_phase(&build).await.unwrap();
    store
        .mark_phase_running(&workflow.id, PhaseName::Build, 1)
        .await
        .unwrap();

    let parked = engine.recover().await.unwrap();
    assert_eq!(parked, 1);

    let paused = engine.get(&workflow.id).await.unwrap();
    assert_eq!(paused.state, WorkflowState::Paused);
    let build = store
        .get_phase(&workflow.id, PhaseName::Build, 1)
        .await
        .unwrap();
    assert_eq!(build.state, PhaseState::Failed);
    assert_eq!(build.error_message.as_deref(), Some("interrupted"));
    let events = engine.events(&workflow.id, None).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::ResumeRequired));

    // resume starts a fresh build attempt and runs to completion
    engine.resume(&workflow.id).await.unwrap();
    let done = wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;
    assert_eq!(done.exit_code, Some(0));

    let phases = engine.phases(&workflow.id).await.unwrap();
    let build_attempts: Vec<(u32, PhaseState)> = phases
        .iter()
        .filter(|p| p.name == PhaseName::Build)
        .map(|p| (p.attempt, p.state))
        .collect();
    assert_eq!(
        build_attempts,
        vec![(1, PhaseState::Failed), (2, PhaseState::Completed)]
    );
    // plan was not re-run
    assert_eq!(
        phases.iter().filter(|p| p.name == PhaseName::Plan).count(),
        1
    );
}

// Pause is honored at a phase boundary; resume continues from the same
// position.
#[tokio::test]
async fn pause_resume_round_trip() {
    let provider = Arc::new(MockProvider::new("p1"));
    provider.push_delayed("plan output", Duration::from_millis(300));
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;

    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    wait_for_phase_state(&engine, &workflow.id, PhaseName::Plan, PhaseState::Running).await;

    // request the pause while plan is still in flight
    engine.pause(&workflow.id).await.unwrap();
    let paused = wait_for_state(&engine, &workflow.id, WorkflowState::Paused).await;
    assert!(paused.last_activity_at >= workflow.last_activity_at);

    // the in-flight plan phase completed before the boundary pause
    let phases = engine.phases(&workflow.id).await.unwrap();
    assert_eq!(phases.len(), 1);
    assert_eq!(phases[0].name, PhaseName::Plan);
    assert_eq!(phases[0].state, PhaseState::Completed);

    engine.resume(&workflow.id).await.unwrap();
    let done = wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;
    // plan ran exactly once across the pause
    let plan_attempts = engine
        .phases(&workflow.id)
        .await
        .unwrap()
        .iter()
        .filter(|p| p.name == PhaseName::Plan)
        .count();
    assert_eq!(plan_attempts, 1);
    assert_eq!(done.phase_count, 4);
}

// Budget enforcement fails the phase permanently before any call.
#[tokio::test]
async fn budget_exceeded_is_permanent() {
    let provider = Arc::new(MockProvider::new("p1"));
    let engine = engine_with_providers(vec![provider.clone()], ForemanConfig::default()).await;

    let mut workflow_spec = spec(WorkflowKind::Standard);
    workflow_spec.budget_usd = Some(0.0001);
    let workflow = engine.create(workflow_spec).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let failed = wait_for_state(&engine, &workflow.id, WorkflowState::Failed).await;

    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("budget exceeded"));
    // the request never went out
    assert_eq!(provider.call_count(), 0);
    // no retries for permanent failures
    let phases = engine.phases(&workflow.id).await.unwrap();
    assert_eq!(phases.len(), 1);
}

// max_attempts = 1 disables retry.
#[tokio::test]
async fn single_attempt_disables_retry() {
    let provider = Arc::new(MockProvider::new("p1"));
    provider.push_error(ProviderError::Unavailable("502".to_string()));
    let config = ForemanConfig::from_toml("[engine]\ndefault_max_attempts = 1\n").unwrap();
    let engine = engine_with_providers(vec![provider.clone()], config).await;

    let workflow = engine.create(spec(WorkflowKind::PlanOnly)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    wait_for_state(&engine, &workflow.id, WorkflowState::Failed).await;

    assert_eq!(provider.call_count(), 1);
    assert_eq!(engine.phases(&workflow.id).await.unwrap().len(), 1);
}

// Optional refactor phase is skipped, not fatal, once retries exhaust.
#[tokio::test]
async fn optional_phase_skips_on_permanent_failure() {
    let provider = Arc::new(MockProvider::new("p1"));
    let runner = Arc::new(FixedTestRunner::always(0));
    runner.push(1); // red check fails as required
    // provider call order for tdd: plan, generate_tests, build, refactor, review
    provider.push_text("plan");
    provider.push_text("tests");
    provider.push_text("build");
    provider.push_error(ProviderError::InvalidRequest("bad prompt".to_string()));
    let engine = engine_builder(vec![provider.clone()], ForemanConfig::default())
        .await
        .test_runner(runner)
        .build();

    let workflow = engine.create(spec(WorkflowKind::Tdd)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    let done = wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;
    assert_eq!(done.exit_code, Some(0));

    let phases = engine.phases(&workflow.id).await.unwrap();
    let refactor: Vec<_> = phases
        .iter()
        .filter(|p| p.name == PhaseName::Refactor)
        .collect();
    assert_eq!(refactor.len(), 2);
    assert_eq!(refactor[0].state, PhaseState::Failed);
    assert_eq!(refactor[1].state, PhaseState::Skipped);
    // review still ran
    assert!(phases
        .iter()
        .any(|p| p.name == PhaseName::Review && p.state == PhaseState::Completed));
}

// Stuck reaper marks inactive running workflows; resume revives them.
#[tokio::test]
async fn reaper_marks_stuck_workflows() {
    let provider = Arc::new(MockProvider::new("p1"));
    let config = ForemanConfig::from_toml("[engine]\nstuck_threshold_seconds = 0\n").unwrap();
    let engine = engine_with_providers(vec![provider], config).await;

    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    // running in the store with no live supervisor
    engine_store(&engine)
        .transition_workflow(
            &workflow.id,
            WorkflowState::Created,
            WorkflowState::Running,
            TransitionChanges::default(),
        )
        .await
        .unwrap();

    let marked = reaper::sweep(&engine).await.unwrap();
    assert_eq!(marked, 1);
    assert_eq!(
        engine.get(&workflow.id).await.unwrap().state,
        WorkflowState::Stuck
    );

    engine.resume(&workflow.id).await.unwrap();
    wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;
}

// Archive requires a terminal state, cascades, and is idempotent.
#[tokio::test]
async fn archive_after_completion() {
    let provider = Arc::new(MockProvider::new("p1"));
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;

    let workflow = engine.create(spec(WorkflowKind::PlanOnly)).await.unwrap();
    let err = engine.archive(&workflow.id).await.unwrap_err();
    assert!(matches!(
        err,
        foreman_core::ForemanError::InvalidTransition { .. }
    ));

    engine.start(&workflow.id).await.unwrap();
    wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;

    let archived = engine.archive(&workflow.id).await.unwrap();
    assert_eq!(archived.state, WorkflowState::Archived);
    assert!(archived.archived_at.is_some());
    assert!(engine.phases(&workflow.id).await.unwrap().is_empty());

    let again = engine.archive(&workflow.id).await.unwrap();
    assert_eq!(again.archived_at, archived.archived_at);
}

// Terminal workflows report back to the issue tracker.
#[tokio::test]
async fn issue_comment_on_completion() {
    let provider = Arc::new(MockProvider::new("p1"));
    let issues = Arc::new(RecordingIssueSource::default());
    let engine = engine_builder(vec![provider], ForemanConfig::default())
        .await
        .issue_source(issues.clone())
        .build();

    let mut workflow_spec = spec(WorkflowKind::PlanOnly);
    workflow_spec.issue_ref = Some("repo#42".to_string());
    let workflow = engine.create(workflow_spec).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;

    // comment posting happens right before the supervisor exits
    for _ in 0..100 {
        if !issues.comments.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let comments = issues.comments.lock().clone();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, "repo#42");
    assert!(comments[0].1.contains("completed"));
}

// Port pools exhaust cleanly and release on termination.
#[tokio::test]
async fn port_allocation_and_exhaustion() {
    let provider = Arc::new(MockProvider::new("p1"));
    let config = ForemanConfig::from_toml(
        r#"
        [engine.port_ranges]
        backend = { start = 9100, end = 9100 }
        frontend = { start = 9200, end = 9200 }
        "#,
    )
    .unwrap();
    let engine = engine_with_providers(vec![provider], config).await;

    let first = engine.create(spec(WorkflowKind::PlanOnly)).await.unwrap();
    let second = engine.create(spec(WorkflowKind::PlanOnly)).await.unwrap();

    let (backend, frontend) = engine.allocate_ports(&first.id).await.unwrap();
    assert_eq!((backend, frontend), (9100, 9200));

    let err = engine.allocate_ports(&second.id).await.unwrap_err();
    assert!(matches!(
        err,
        foreman_core::ForemanError::ResourceExhausted(_)
    ));

    // termination releases the binding
    engine.start(&first.id).await.unwrap();
    wait_for_state(&engine, &first.id, WorkflowState::Completed).await;
    for _ in 0..100 {
        if engine.get(&first.id).await.unwrap().backend_port.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.get(&first.id).await.unwrap().backend_port.is_none());
    assert_eq!(engine.allocate_ports(&second.id).await.unwrap(), (9100, 9200));
}

// The event journal attached to the bus captures the full history, and
// replaying it reconstructs the workflow/phase states the store holds.
#[tokio::test]
async fn journal_replay_reconstructs_states() {
    use foreman_storage::{replay, EventJournal};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.ndjson");
    let provider = Arc::new(MockProvider::new("p1"));
    let engine = engine_with_providers(vec![provider], ForemanConfig::default()).await;
    let journal = Arc::new(EventJournal::open(&path).unwrap());
    engine.bus().subscribe(journal.handler(), None);

    let workflow = engine.create(spec(WorkflowKind::Standard)).await.unwrap();
    engine.start(&workflow.id).await.unwrap();
    wait_for_state(&engine, &workflow.id, WorkflowState::Completed).await;

    // the journal subscriber drains asynchronously
    let mut events = Vec::new();
    for _ in 0..200 {
        events = EventJournal::read_all(&path).unwrap();
        if events
            .iter()
            .any(|e| e.to_state == Some(WorkflowState::Completed))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let replayed = replay(&events);
    assert_eq!(replayed.workflows[&workflow.id], WorkflowState::Completed);

    for phase in engine.phases(&workflow.id).await.unwrap() {
        assert_eq!(
            replayed.phases[&(workflow.id.clone(), phase.name)],
            phase.state
        );
    }
}

/// Reach into the engine for direct store access in recovery-style tests.
fn engine_store(engine: &Engine) -> foreman_storage::StateStore {
    engine.store().clone()
}
