// The state store
//
// Typed operations over the SQLite database. All writes go through the
// single-connection writer pool; reads use a separate concurrent pool.
// Workflow transitions are single-row compare-and-swap updates guarded by
// the current state, which makes them atomic without a lock manager.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use foreman_core::{
    Event, ForemanError, ListFilter, Phase, PhaseName, PhaseState, Workflow, WorkflowKind,
    WorkflowState,
};

use crate::migrations;
use crate::models::{EventRow, PhaseRow, WorkflowRow};

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Compare-and-swap guard did not match
    #[error("conflict: {0}")]
    Conflict(String),

    /// The database was locked by another writer
    #[error("database busy")]
    Busy,

    /// A CHECK / UNIQUE / FK constraint rejected the write
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            use sqlx::error::ErrorKind;
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    return StoreError::Constraint(db.message().to_string());
                }
                _ => {
                    let message = db.message();
                    if message.contains("locked") || message.contains("busy") {
                        return StoreError::Busy;
                    }
                }
            }
        }
        StoreError::Database(err)
    }
}

impl From<StoreError> for ForemanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ForemanError::NotFound(msg),
            // A failed CAS means someone else transitioned concurrently;
            // the caller re-reads and re-decides.
            StoreError::Conflict(msg) => ForemanError::Transient(msg),
            StoreError::Busy => ForemanError::Transient("database busy".to_string()),
            StoreError::Constraint(msg) => ForemanError::Validation(msg),
            StoreError::Serialization(msg) => ForemanError::Internal(anyhow::anyhow!(msg)),
            StoreError::Database(err) => ForemanError::Internal(err.into()),
        }
    }
}

/// Non-timestamp fields a transition may set
#[derive(Debug, Clone, Default)]
pub struct TransitionChanges {
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

impl TransitionChanges {
    pub fn with_error(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            error_message: Some(message.into()),
        }
    }
}

/// Daily rollup per (date, kind). Recomputed on demand; not authoritative.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsAggregate {
    pub date: String,
    pub kind: WorkflowKind,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_duration_seconds: Option<f64>,
    pub cost_usd: f64,
    pub success_rate: f64,
}

/// Durable store of workflows, phases and events
#[derive(Clone)]
pub struct StateStore {
    writer: SqlitePool,
    reader: SqlitePool,
}

impl StateStore {
    /// Open (creating if missing) the database file and apply migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Serialization(format!("cannot create state dir: {}", e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        let reader = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        migrations::apply(&writer).await?;
        Ok(Self { writer, reader })
    }

    /// In-memory store for tests. A single shared connection serves both
    /// reads and writes.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options: SqliteConnectOptions = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrations::apply(&pool).await?;
        Ok(Self {
            writer: pool.clone(),
            reader: pool,
        })
    }

    /// Liveness probe for the health surface.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.reader).await?;
        Ok(())
    }

    // ============================================
    // Workflows
    // ============================================

    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let tags = serde_json::to_string(&workflow.tags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_string(&workflow.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, name, kind, state, task,
                created_at, started_at, last_activity_at, completed_at, archived_at,
                issue_ref, branch, base_branch, worktree_path,
                tags, metadata,
                exit_code, error_message, retry_count,
                cost_usd, total_tokens, phase_count,
                backend_port, frontend_port, issue_class, model_set, budget_usd
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.kind.as_str())
        .bind(workflow.state.as_str())
        .bind(&workflow.task)
        .bind(workflow.created_at)
        .bind(workflow.started_at)
        .bind(workflow.last_activity_at)
        .bind(workflow.completed_at)
        .bind(workflow.archived_at)
        .bind(&workflow.issue_ref)
        .bind(&workflow.branch)
        .bind(&workflow.base_branch)
        .bind(&workflow.worktree_path)
        .bind(&tags)
        .bind(&metadata)
        .bind(workflow.exit_code)
        .bind(&workflow.error_message)
        .bind(workflow.retry_count as i64)
        .bind(workflow.cost_usd)
        .bind(workflow.total_tokens as i64)
        .bind(workflow.phase_count as i64)
        .bind(workflow.backend_port.map(|p| p as i64))
        .bind(workflow.frontend_port.map(|p| p as i64))
        .bind(workflow.issue_class.map(|c| c.as_str()))
        .bind(workflow.model_set.as_str())
        .bind(workflow.budget_usd)
        .execute(&self.writer)
        .await?;

        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.reader)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", id)))?;
        row.try_into()
    }

    pub async fn list_workflows(&self, filter: &ListFilter) -> Result<Vec<Workflow>, StoreError> {
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT * FROM workflows WHERE 1=1");
        if let Some(state) = filter.state {
            qb.push(" AND state = ").push_bind(state.as_str());
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(issue_class) = filter.issue_class {
            qb.push(" AND issue_class = ").push_bind(issue_class.as_str());
        }
        if let Some(tag) = &filter.tag {
            qb.push(" AND tags LIKE ").push_bind(format!("%\"{}\"%", tag));
        }
        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
            if let Some(offset) = filter.offset {
                qb.push(" OFFSET ").push_bind(offset as i64);
            }
        }

        let rows: Vec<WorkflowRow> = qb.build_query_as().fetch_all(&self.reader).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn workflows_in_state(
        &self,
        state: WorkflowState,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM workflows WHERE state = ?1 ORDER BY created_at ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.reader)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Running workflows whose last activity is older than the threshold.
    pub async fn stuck_candidates(&self, threshold: Duration) -> Result<Vec<Workflow>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let rows = sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM workflows WHERE state = 'running' AND last_activity_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.reader)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Compare-and-swap state transition. Fails with `Conflict` when the
    /// row is no longer in `from`. Timestamps are stamped by target state:
    /// `started_at` on first entry to running, `completed_at` on terminal
    /// states, `archived_at` on archive.
    pub async fn transition_workflow(
        &self,
        id: &str,
        from: WorkflowState,
        to: WorkflowState,
        changes: TransitionChanges,
    ) -> Result<Workflow, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                state = ?2,
                last_activity_at = ?3,
                started_at = CASE WHEN ?4 THEN COALESCE(started_at, ?3) ELSE started_at END,
                completed_at = CASE WHEN ?5 THEN ?3 ELSE completed_at END,
                archived_at = CASE WHEN ?2 = 'archived' THEN ?3 ELSE archived_at END,
                exit_code = COALESCE(?6, exit_code),
                error_message = COALESCE(?7, error_message)
            WHERE id = ?1 AND state = ?8
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(now)
        .bind(to == WorkflowState::Running)
        .bind(to.is_terminal())
        .bind(changes.exit_code)
        .bind(&changes.error_message)
        .bind(from.as_str())
        .execute(&self.writer)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_workflow(id).await?;
            return Err(StoreError::Conflict(format!(
                "workflow {} is {}, expected {}",
                id, current.state, from
            )));
        }
        self.get_workflow(id).await
    }

    /// Bump `last_activity_at`; the reaper keys off this column.
    pub async fn touch_workflow(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflows SET last_activity_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.writer)
            .await?;
        Ok(())
    }

    /// Accumulate cost/token usage. Totals only ever grow.
    pub async fn add_workflow_usage(
        &self,
        id: &str,
        cost_delta: f64,
        tokens_delta: u64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflows SET
                cost_usd = cost_usd + ?2,
                total_tokens = total_tokens + ?3,
                last_activity_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(cost_delta.max(0.0))
        .bind(tokens_delta as i64)
        .bind(Utc::now())
        .execute(&self.writer)
        .await?;
        Ok(())
    }

    pub async fn increment_retry_count(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflows SET retry_count = retry_count + 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.writer)
            .await?;
        Ok(())
    }

    /// Persist port bindings; `None` clears the column.
    pub async fn set_workflow_ports(
        &self,
        id: &str,
        backend_port: Option<u16>,
        frontend_port: Option<u16>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflows SET backend_port = ?2, frontend_port = ?3 WHERE id = ?1")
            .bind(id)
            .bind(backend_port.map(|p| p as i64))
            .bind(frontend_port.map(|p| p as i64))
            .execute(&self.writer)
            .await?;
        Ok(())
    }

    pub async fn set_workflow_worktree(
        &self,
        id: &str,
        branch: &str,
        worktree_path: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflows SET branch = ?2, worktree_path = ?3 WHERE id = ?1")
            .bind(id)
            .bind(branch)
            .bind(worktree_path)
            .execute(&self.writer)
            .await?;
        Ok(())
    }

    /// Archive a terminal workflow: stamp `archived_at` and delete its
    /// phases and events. Idempotent: archiving an archived workflow is a
    /// no-op returning the current row.
    pub async fn archive_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        let current = self.get_workflow(id).await?;
        if current.state == WorkflowState::Archived {
            return Ok(current);
        }
        if !current.state.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "workflow {} is {}, not terminal",
                id, current.state
            )));
        }

        let mut tx = self.writer.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE workflows SET state = 'archived', archived_at = ?2, last_activity_at = ?2
            WHERE id = ?1 AND state IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "workflow {} changed state during archive",
                id
            )));
        }
        sqlx::query("DELETE FROM phases WHERE workflow_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM events WHERE workflow_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_workflow(id).await
    }

    // ============================================
    // Phases
    // ============================================

    /// Insert a fresh phase attempt and bump the workflow's phase count in
    /// the same transaction.
    pub async fn insert_phase(&self, phase: &Phase) -> Result<(), StoreError> {
        let mut tx = self.writer.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO phases (
                workflow_id, name, attempt, idx, state,
                started_at, completed_at, duration_seconds,
                exit_code, error_message, max_attempts,
                llm_requests, llm_tokens_in, llm_tokens_out, cost_usd
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&phase.workflow_id)
        .bind(phase.name.as_str())
        .bind(phase.attempt as i64)
        .bind(phase.index as i64)
        .bind(phase.state.as_str())
        .bind(phase.started_at)
        .bind(phase.completed_at)
        .bind(phase.duration_seconds)
        .bind(phase.exit_code)
        .bind(&phase.error_message)
        .bind(phase.max_attempts as i64)
        .bind(phase.llm_requests as i64)
        .bind(phase.llm_tokens_in as i64)
        .bind(phase.llm_tokens_out as i64)
        .bind(phase.cost_usd)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE workflows SET phase_count = phase_count + 1, last_activity_at = ?2 WHERE id = ?1",
        )
        .bind(&phase.workflow_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_phase(
        &self,
        workflow_id: &str,
        name: PhaseName,
        attempt: u32,
    ) -> Result<Phase, StoreError> {
        let row = sqlx::query_as::<_, PhaseRow>(
            "SELECT * FROM phases WHERE workflow_id = ?1 AND name = ?2 AND attempt = ?3",
        )
        .bind(workflow_id)
        .bind(name.as_str())
        .bind(attempt as i64)
        .fetch_optional(&self.reader)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!("phase {}/{}/{}", workflow_id, name, attempt))
        })?;
        row.try_into()
    }

    pub async fn list_phases(&self, workflow_id: &str) -> Result<Vec<Phase>, StoreError> {
        let rows = sqlx::query_as::<_, PhaseRow>(
            "SELECT * FROM phases WHERE workflow_id = ?1 ORDER BY idx ASC, attempt ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.reader)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Phases currently in `running` for a workflow. The engine's invariant
    /// is that this never exceeds one.
    pub async fn running_phases(&self, workflow_id: &str) -> Result<Vec<Phase>, StoreError> {
        let rows = sqlx::query_as::<_, PhaseRow>(
            "SELECT * FROM phases WHERE workflow_id = ?1 AND state = 'running'",
        )
        .bind(workflow_id)
        .fetch_all(&self.reader)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// CAS pending -> running, stamping `started_at`.
    pub async fn mark_phase_running(
        &self,
        workflow_id: &str,
        name: PhaseName,
        attempt: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE phases SET state = 'running', started_at = ?4
            WHERE workflow_id = ?1 AND name = ?2 AND attempt = ?3 AND state = 'pending'
            "#,
        )
        .bind(workflow_id)
        .bind(name.as_str())
        .bind(attempt as i64)
        .bind(Utc::now())
        .execute(&self.writer)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "phase {}/{}/{} is not pending",
                workflow_id, name, attempt
            )));
        }
        Ok(())
    }

    /// CAS running -> completed|failed, stamping `completed_at` and
    /// computing the duration from `started_at`.
    pub async fn finish_phase(
        &self,
        workflow_id: &str,
        name: PhaseName,
        attempt: u32,
        state: PhaseState,
        exit_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Result<Phase, StoreError> {
        debug_assert!(matches!(
            state,
            PhaseState::Completed | PhaseState::Failed
        ));

        let mut tx = self.writer.begin().await?;
        let row = sqlx::query_as::<_, PhaseRow>(
            "SELECT * FROM phases WHERE workflow_id = ?1 AND name = ?2 AND attempt = ?3",
        )
        .bind(workflow_id)
        .bind(name.as_str())
        .bind(attempt as i64)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!("phase {}/{}/{}", workflow_id, name, attempt))
        })?;

        let now = Utc::now();
        let duration = row
            .started_at
            .map(|started| (now - started).num_milliseconds() as f64 / 1000.0);

        let result = sqlx::query(
            r#"
            UPDATE phases SET
                state = ?4, completed_at = ?5, duration_seconds = ?6,
                exit_code = ?7, error_message = ?8
            WHERE workflow_id = ?1 AND name = ?2 AND attempt = ?3 AND state = 'running'
            "#,
        )
        .bind(workflow_id)
        .bind(name.as_str())
        .bind(attempt as i64)
        .bind(state.as_str())
        .bind(now)
        .bind(duration)
        .bind(exit_code)
        .bind(error_message)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "phase {}/{}/{} is not running",
                workflow_id, name, attempt
            )));
        }
        tx.commit().await?;

        self.get_phase(workflow_id, name, attempt).await
    }

    /// CAS pending -> skipped for optional phases.
    pub async fn skip_phase(
        &self,
        workflow_id: &str,
        name: PhaseName,
        attempt: u32,
        reason: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE phases SET state = 'skipped', error_message = ?4
            WHERE workflow_id = ?1 AND name = ?2 AND attempt = ?3 AND state = 'pending'
            "#,
        )
        .bind(workflow_id)
        .bind(name.as_str())
        .bind(attempt as i64)
        .bind(reason)
        .execute(&self.writer)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "phase {}/{}/{} is not pending",
                workflow_id, name, attempt
            )));
        }
        Ok(())
    }

    /// Accumulate provider usage onto a phase attempt.
    pub async fn add_phase_usage(
        &self,
        workflow_id: &str,
        name: PhaseName,
        attempt: u32,
        requests: u32,
        tokens_in: u64,
        tokens_out: u64,
        cost_usd: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE phases SET
                llm_requests = llm_requests + ?4,
                llm_tokens_in = llm_tokens_in + ?5,
                llm_tokens_out = llm_tokens_out + ?6,
                cost_usd = cost_usd + ?7
            WHERE workflow_id = ?1 AND name = ?2 AND attempt = ?3
            "#,
        )
        .bind(workflow_id)
        .bind(name.as_str())
        .bind(attempt as i64)
        .bind(requests as i64)
        .bind(tokens_in as i64)
        .bind(tokens_out as i64)
        .bind(cost_usd.max(0.0))
        .execute(&self.writer)
        .await?;
        Ok(())
    }

    // ============================================
    // Events
    // ============================================

    /// Append an event, assigning the next store-wide sequence number.
    pub async fn append_event(&self, event: &Event) -> Result<Event, StoreError> {
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                workflow_id, event_type, severity, phase_name,
                from_state, to_state, message, metadata, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&event.workflow_id)
        .bind(event.event_type.as_str())
        .bind(event.severity.to_string())
        .bind(event.phase_name.map(|p| p.as_str()))
        .bind(event.from_state.map(|s| s.as_str()))
        .bind(event.to_state.map(|s| s.as_str()))
        .bind(&event.message)
        .bind(&metadata)
        .bind(event.created_at)
        .execute(&self.writer)
        .await?;

        let mut stored = event.clone();
        stored.seq = result.last_insert_rowid();
        Ok(stored)
    }

    /// Ordered events for one workflow, optionally after a sequence number.
    pub async fn events_for_workflow(
        &self,
        workflow_id: &str,
        since_seq: Option<i64>,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE workflow_id = ?1 AND seq > ?2
            ORDER BY seq ASC
            "#,
        )
        .bind(workflow_id)
        .bind(since_seq.unwrap_or(0))
        .fetch_all(&self.reader)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// All events after a sequence number, across workflows.
    pub async fn events_since(&self, since_seq: i64) -> Result<Vec<Event>, StoreError> {
        let rows =
            sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE seq > ?1 ORDER BY seq ASC")
                .bind(since_seq)
                .fetch_all(&self.reader)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    // ============================================
    // Aggregates
    // ============================================

    pub async fn count_by_state(&self) -> Result<Vec<(WorkflowState, i64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM workflows GROUP BY state")
                .fetch_all(&self.reader)
                .await?;
        rows.into_iter()
            .map(|(state, count)| {
                state
                    .parse()
                    .map(|s| (s, count))
                    .map_err(StoreError::Serialization)
            })
            .collect()
    }

    /// Wall-clock durations of all completed workflows, for percentile
    /// computation.
    pub async fn completed_durations(&self) -> Result<Vec<f64>, StoreError> {
        let rows: Vec<(f64,)> = sqlx::query_as(
            r#"
            SELECT (julianday(completed_at) - julianday(started_at)) * 86400.0
            FROM workflows
            WHERE completed_at IS NOT NULL AND started_at IS NOT NULL
            "#,
        )
        .fetch_all(&self.reader)
        .await?;
        Ok(rows.into_iter().map(|(seconds,)| seconds).collect())
    }

    /// Daily rollups. The legacy `total_cost` alias in the query feeds the
    /// canonical `cost_usd` field.
    pub async fn metrics_aggregates(&self) -> Result<Vec<MetricsAggregate>, StoreError> {
        let rows: Vec<(String, String, i64, i64, i64, Option<f64>, f64)> = sqlx::query_as(
            r#"
            SELECT
                date(created_at) AS day,
                kind,
                COUNT(*) AS total,
                SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END) AS failed,
                AVG(CASE WHEN completed_at IS NOT NULL AND started_at IS NOT NULL
                    THEN (julianday(completed_at) - julianday(started_at)) * 86400.0
                    END) AS avg_duration_seconds,
                SUM(cost_usd) AS total_cost
            FROM workflows
            GROUP BY day, kind
            ORDER BY day DESC, kind ASC
            "#,
        )
        .fetch_all(&self.reader)
        .await?;

        rows.into_iter()
            .map(|(date, kind, total, completed, failed, avg_duration, total_cost)| {
                let kind: WorkflowKind = kind.parse().map_err(StoreError::Serialization)?;
                let success_rate = if total > 0 {
                    completed as f64 / total as f64
                } else {
                    0.0
                };
                Ok(MetricsAggregate {
                    date,
                    kind,
                    total,
                    completed,
                    failed,
                    avg_duration_seconds: avg_duration,
                    cost_usd: total_cost,
                    success_rate,
                })
            })
            .collect()
    }
}
