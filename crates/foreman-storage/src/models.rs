// Row types and domain conversions
//
// Enums are persisted as their snake_case strings; tags and metadata as
// JSON text. The row structs mirror the schema exactly; conversion into
// domain types parses the strings and fails with a serialization error on
// corrupt rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use foreman_core::{Event, Phase, Workflow};

use crate::store::StoreError;

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Serialization)
}

fn parse_opt<T: std::str::FromStr<Err = String>>(
    value: Option<&str>,
) -> Result<Option<T>, StoreError> {
    value.map(parse).transpose()
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub state: String,
    pub task: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub issue_ref: Option<String>,
    pub branch: Option<String>,
    pub base_branch: String,
    pub worktree_path: Option<String>,
    pub tags: String,
    pub metadata: String,
    pub exit_code: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub cost_usd: f64,
    pub total_tokens: i64,
    pub phase_count: i64,
    pub backend_port: Option<i64>,
    pub frontend_port: Option<i64>,
    pub issue_class: Option<String>,
    pub model_set: String,
    pub budget_usd: Option<f64>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let tags: Vec<String> = serde_json::from_str(&row.tags)
            .map_err(|e| StoreError::Serialization(format!("bad tags json: {}", e)))?;
        let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&row.metadata)
            .map_err(|e| StoreError::Serialization(format!("bad metadata json: {}", e)))?;

        Ok(Workflow {
            id: row.id,
            name: row.name,
            kind: parse(&row.kind)?,
            state: parse(&row.state)?,
            task: row.task,
            created_at: row.created_at,
            started_at: row.started_at,
            last_activity_at: row.last_activity_at,
            completed_at: row.completed_at,
            archived_at: row.archived_at,
            issue_ref: row.issue_ref,
            branch: row.branch,
            base_branch: row.base_branch,
            worktree_path: row.worktree_path,
            tags,
            metadata,
            exit_code: row.exit_code.map(|c| c as i32),
            error_message: row.error_message,
            retry_count: row.retry_count as u32,
            cost_usd: row.cost_usd,
            total_tokens: row.total_tokens as u64,
            phase_count: row.phase_count as u32,
            backend_port: row.backend_port.map(|p| p as u16),
            frontend_port: row.frontend_port.map(|p| p as u16),
            issue_class: parse_opt(row.issue_class.as_deref())?,
            model_set: parse(&row.model_set)?,
            budget_usd: row.budget_usd,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PhaseRow {
    pub workflow_id: String,
    pub name: String,
    pub attempt: i64,
    pub idx: i64,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub exit_code: Option<i64>,
    pub error_message: Option<String>,
    pub max_attempts: i64,
    pub llm_requests: i64,
    pub llm_tokens_in: i64,
    pub llm_tokens_out: i64,
    pub cost_usd: f64,
}

impl TryFrom<PhaseRow> for Phase {
    type Error = StoreError;

    fn try_from(row: PhaseRow) -> Result<Self, Self::Error> {
        Ok(Phase {
            workflow_id: row.workflow_id,
            name: parse(&row.name)?,
            attempt: row.attempt as u32,
            index: row.idx as u32,
            state: parse(&row.state)?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_seconds: row.duration_seconds,
            exit_code: row.exit_code.map(|c| c as i32),
            error_message: row.error_message,
            max_attempts: row.max_attempts as u32,
            llm_requests: row.llm_requests as u32,
            llm_tokens_in: row.llm_tokens_in as u64,
            llm_tokens_out: row.llm_tokens_out as u64,
            cost_usd: row.cost_usd,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub seq: i64,
    pub workflow_id: String,
    pub event_type: String,
    pub severity: String,
    pub phase_name: Option<String>,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
    pub message: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Serialization(format!("bad event metadata: {}", e)))?;

        Ok(Event {
            seq: row.seq,
            workflow_id: row.workflow_id,
            event_type: parse(&row.event_type)?,
            severity: parse(&row.severity)?,
            phase_name: parse_opt(row.phase_name.as_deref())?,
            from_state: parse_opt(row.from_state.as_deref())?,
            to_state: parse_opt(row.to_state.as_deref())?,
            message: row.message,
            metadata,
            created_at: row.created_at,
        })
    }
}
