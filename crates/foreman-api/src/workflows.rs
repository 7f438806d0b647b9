// Workflow control HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use foreman_core::{
    Event, ForemanError, IssueClass, ListFilter, ModelSet, Phase, Workflow, WorkflowKind,
    WorkflowSpec,
};
use foreman_engine::Engine;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Request to create a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub kind: WorkflowKind,
    pub task: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub model_set: ModelSet,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub issue_ref: Option<String>,
    #[serde(default)]
    pub issue_class: Option<IssueClass>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
}

/// Request to cancel a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled".to_string()
}

/// Query parameters for listing workflows
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub state: Option<foreman_core::WorkflowState>,
    pub kind: Option<WorkflowKind>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Query parameters for the event stream
#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub since_seq: Option<i64>,
}

/// Workflow representation on the wire
#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowDto {
    pub id: String,
    pub name: String,
    pub kind: WorkflowKind,
    pub state: foreman_core::WorkflowState,
    pub task: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub issue_ref: Option<String>,
    pub branch: Option<String>,
    pub base_branch: String,
    pub tags: Vec<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub phase_count: u32,
    pub backend_port: Option<u16>,
    pub frontend_port: Option<u16>,
    pub model_set: ModelSet,
    pub budget_usd: Option<f64>,
}

impl From<Workflow> for WorkflowDto {
    fn from(workflow: Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name,
            kind: workflow.kind,
            state: workflow.state,
            task: workflow.task,
            created_at: workflow.created_at,
            started_at: workflow.started_at,
            last_activity_at: workflow.last_activity_at,
            completed_at: workflow.completed_at,
            archived_at: workflow.archived_at,
            issue_ref: workflow.issue_ref,
            branch: workflow.branch,
            base_branch: workflow.base_branch,
            tags: workflow.tags,
            exit_code: workflow.exit_code,
            error_message: workflow.error_message,
            retry_count: workflow.retry_count,
            cost_usd: workflow.cost_usd,
            total_tokens: workflow.total_tokens,
            phase_count: workflow.phase_count,
            backend_port: workflow.backend_port,
            frontend_port: workflow.frontend_port,
            model_set: workflow.model_set,
            budget_usd: workflow.budget_usd,
        }
    }
}

/// Phase representation on the wire
#[derive(Debug, Serialize, ToSchema)]
pub struct PhaseDto {
    pub name: String,
    pub attempt: u32,
    pub index: u32,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub llm_requests: u32,
    pub cost_usd: f64,
}

impl From<Phase> for PhaseDto {
    fn from(phase: Phase) -> Self {
        Self {
            name: phase.name.to_string(),
            attempt: phase.attempt,
            index: phase.index,
            state: phase.state.to_string(),
            started_at: phase.started_at,
            completed_at: phase.completed_at,
            duration_seconds: phase.duration_seconds,
            exit_code: phase.exit_code,
            error_message: phase.error_message,
            llm_requests: phase.llm_requests,
            cost_usd: phase.cost_usd,
        }
    }
}

/// Event representation on the wire
#[derive(Debug, Serialize, ToSchema)]
pub struct EventDto {
    pub seq: i64,
    pub event_type: String,
    pub severity: String,
    pub phase_name: Option<String>,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Event> for EventDto {
    fn from(event: Event) -> Self {
        Self {
            seq: event.seq,
            event_type: event.event_type.to_string(),
            severity: event.severity.to_string(),
            phase_name: event.phase_name.map(|p| p.to_string()),
            from_state: event.from_state.map(|s| s.to_string()),
            to_state: event.to_state.map(|s| s.to_string()),
            message: event.message,
            created_at: event.created_at,
        }
    }
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/v1/workflows/:id", get(get_workflow))
        .route("/v1/workflows/:id/start", post(start_workflow))
        .route("/v1/workflows/:id/pause", post(pause_workflow))
        .route("/v1/workflows/:id/resume", post(resume_workflow))
        .route("/v1/workflows/:id/cancel", post(cancel_workflow))
        .route("/v1/workflows/:id/archive", post(archive_workflow))
        .route("/v1/workflows/:id/events", get(list_events))
        .route("/v1/workflows/:id/phases", get(list_phases))
        .with_state(state)
}

fn status_for(err: &ForemanError) -> StatusCode {
    match err {
        ForemanError::Validation(_) => StatusCode::BAD_REQUEST,
        ForemanError::NotFound(_) => StatusCode::NOT_FOUND,
        ForemanError::InvalidTransition { .. } => StatusCode::CONFLICT,
        ForemanError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        ForemanError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        ForemanError::Permanent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ForemanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log_and_map(err: ForemanError) -> StatusCode {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
    status
}

/// POST /v1/workflows - Create a workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = WorkflowDto),
        (status = 400, description = "Invalid request")
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowDto>), StatusCode> {
    let spec = WorkflowSpec {
        name: request.name,
        kind: request.kind,
        task: request.task,
        tags: request.tags,
        model_set: request.model_set,
        budget_usd: request.budget_usd,
        issue_ref: request.issue_ref,
        issue_class: request.issue_class,
        branch: request.branch,
        base_branch: request.base_branch,
        metadata: Default::default(),
    };
    let workflow = state.engine.create(spec).await.map_err(log_and_map)?;
    Ok((StatusCode::CREATED, Json(workflow.into())))
}

/// GET /v1/workflows - List workflows
#[utoipa::path(
    get,
    path = "/v1/workflows",
    responses(
        (status = 200, description = "List of workflows", body = Vec<WorkflowDto>)
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<WorkflowDto>>, StatusCode> {
    let filter = ListFilter {
        state: params.state,
        kind: params.kind,
        issue_class: None,
        tag: params.tag,
        limit: params.limit,
        offset: params.offset,
    };
    let workflows = state.engine.list(&filter).await.map_err(log_and_map)?;
    Ok(Json(workflows.into_iter().map(Into::into).collect()))
}

/// GET /v1/workflows/:id - Fetch one workflow
#[utoipa::path(
    get,
    path = "/v1/workflows/{id}",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "The workflow", body = WorkflowDto),
        (status = 404, description = "Unknown workflow")
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDto>, StatusCode> {
    let workflow = state.engine.get(&id).await.map_err(log_and_map)?;
    Ok(Json(workflow.into()))
}

/// POST /v1/workflows/:id/start
#[utoipa::path(
    post,
    path = "/v1/workflows/{id}/start",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow started", body = WorkflowDto),
        (status = 409, description = "Not startable in its current state")
    ),
    tag = "workflows"
)]
pub async fn start_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDto>, StatusCode> {
    let workflow = state.engine.start(&id).await.map_err(log_and_map)?;
    Ok(Json(workflow.into()))
}

/// POST /v1/workflows/:id/pause
#[utoipa::path(
    post,
    path = "/v1/workflows/{id}/pause",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 202, description = "Pause requested"),
        (status = 409, description = "Not pausable in its current state")
    ),
    tag = "workflows"
)]
pub async fn pause_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.engine.pause(&id).await.map_err(log_and_map)?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/workflows/:id/resume
#[utoipa::path(
    post,
    path = "/v1/workflows/{id}/resume",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow resumed", body = WorkflowDto),
        (status = 409, description = "Not resumable in its current state")
    ),
    tag = "workflows"
)]
pub async fn resume_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDto>, StatusCode> {
    let workflow = state.engine.resume(&id).await.map_err(log_and_map)?;
    Ok(Json(workflow.into()))
}

/// POST /v1/workflows/:id/cancel
#[utoipa::path(
    post,
    path = "/v1/workflows/{id}/cancel",
    params(("id" = String, Path, description = "Workflow id")),
    request_body = CancelRequest,
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 409, description = "Not cancellable in its current state")
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .cancel(&id, &request.reason)
        .await
        .map_err(log_and_map)?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/workflows/:id/archive
#[utoipa::path(
    post,
    path = "/v1/workflows/{id}/archive",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow archived", body = WorkflowDto),
        (status = 409, description = "Not in a terminal state")
    ),
    tag = "workflows"
)]
pub async fn archive_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDto>, StatusCode> {
    let workflow = state.engine.archive(&id).await.map_err(log_and_map)?;
    Ok(Json(workflow.into()))
}

/// GET /v1/workflows/:id/events - Ordered event history
#[utoipa::path(
    get,
    path = "/v1/workflows/{id}/events",
    params(
        ("id" = String, Path, description = "Workflow id"),
        ("since_seq" = Option<i64>, Query, description = "Only events after this sequence")
    ),
    responses(
        (status = 200, description = "Ordered events", body = Vec<EventDto>),
        (status = 404, description = "Unknown workflow")
    ),
    tag = "workflows"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<EventDto>>, StatusCode> {
    let events = state
        .engine
        .events(&id, params.since_seq)
        .await
        .map_err(log_and_map)?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// GET /v1/workflows/:id/phases - Phase attempts in plan order
#[utoipa::path(
    get,
    path = "/v1/workflows/{id}/phases",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Phase attempts", body = Vec<PhaseDto>),
        (status = 404, description = "Unknown workflow")
    ),
    tag = "workflows"
)]
pub async fn list_phases(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PhaseDto>>, StatusCode> {
    // surface 404 for unknown ids rather than an empty list
    state.engine.get(&id).await.map_err(log_and_map)?;
    let phases = state.engine.phases(&id).await.map_err(log_and_map)?;
    Ok(Json(phases.into_iter().map(Into::into).collect()))
}
