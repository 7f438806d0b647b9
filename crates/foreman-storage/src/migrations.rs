// Schema migrations
//
// Additive, idempotent DDL applied at startup in version order. Applied
// versions are recorded in `schema_version`; every statement also guards
// itself with IF NOT EXISTS so a half-applied migration can be re-run.

use sqlx::SqlitePool;
use tracing::info;

use crate::store::StoreError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_workflows",
        sql: r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN
                    ('standard', 'tdd', 'plan_only', 'test_only', 'review_only')),
                state TEXT NOT NULL CHECK (state IN
                    ('created', 'initialized', 'running', 'paused', 'completed',
                     'failed', 'cancelled', 'stuck', 'archived')),
                task TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                last_activity_at TEXT NOT NULL,
                completed_at TEXT,
                archived_at TEXT CHECK ((state = 'archived') = (archived_at IS NOT NULL)),
                issue_ref TEXT,
                branch TEXT,
                base_branch TEXT NOT NULL DEFAULT 'main',
                worktree_path TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                exit_code INTEGER,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
                cost_usd REAL NOT NULL DEFAULT 0 CHECK (cost_usd >= 0),
                total_tokens INTEGER NOT NULL DEFAULT 0 CHECK (total_tokens >= 0),
                phase_count INTEGER NOT NULL DEFAULT 0 CHECK (phase_count >= 0),
                backend_port INTEGER CHECK (backend_port BETWEEN 9100 AND 9199),
                frontend_port INTEGER CHECK (frontend_port BETWEEN 9200 AND 9299),
                issue_class TEXT CHECK (issue_class IS NULL OR issue_class IN
                    ('feature', 'bug', 'test', 'refactor', 'docs', 'chore')),
                model_set TEXT NOT NULL DEFAULT 'base' CHECK (model_set IN
                    ('base', 'fast', 'powerful')),
                budget_usd REAL CHECK (budget_usd IS NULL OR budget_usd > 0)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "create_phases",
        sql: r#"
            CREATE TABLE IF NOT EXISTS phases (
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                name TEXT NOT NULL CHECK (name IN
                    ('plan', 'build', 'test', 'review', 'deploy', 'generate_tests',
                     'verify_red', 'verify_green', 'refactor')),
                attempt INTEGER NOT NULL CHECK (attempt >= 1),
                idx INTEGER NOT NULL CHECK (idx >= 0),
                state TEXT NOT NULL CHECK (state IN
                    ('pending', 'running', 'completed', 'failed', 'skipped')),
                started_at TEXT,
                completed_at TEXT,
                duration_seconds REAL,
                exit_code INTEGER,
                error_message TEXT,
                max_attempts INTEGER NOT NULL DEFAULT 3 CHECK (max_attempts >= 1),
                llm_requests INTEGER NOT NULL DEFAULT 0 CHECK (llm_requests >= 0),
                llm_tokens_in INTEGER NOT NULL DEFAULT 0 CHECK (llm_tokens_in >= 0),
                llm_tokens_out INTEGER NOT NULL DEFAULT 0 CHECK (llm_tokens_out >= 0),
                cost_usd REAL NOT NULL DEFAULT 0 CHECK (cost_usd >= 0),
                PRIMARY KEY (workflow_id, name, attempt)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_events",
        sql: r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL CHECK (event_type IN
                    ('workflow_created', 'workflow_state_changed', 'phase_started',
                     'phase_completed', 'phase_failed', 'workflow_paused',
                     'workflow_resumed', 'workflow_cancelled', 'workflow_archived',
                     'resource_allocated', 'resource_released', 'resume_required',
                     'error_occurred')),
                severity TEXT NOT NULL DEFAULT 'INFO' CHECK (severity IN
                    ('INFO', 'WARN', 'ERROR')),
                phase_name TEXT,
                from_state TEXT,
                to_state TEXT,
                message TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 4,
        name: "create_indices",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_state ON workflows(state);
            CREATE INDEX IF NOT EXISTS idx_workflows_created_at ON workflows(created_at);
            CREATE INDEX IF NOT EXISTS idx_workflows_last_activity_at ON workflows(last_activity_at);
            CREATE INDEX IF NOT EXISTS idx_workflows_kind ON workflows(kind);
            CREATE INDEX IF NOT EXISTS idx_workflows_state_created_at ON workflows(state, created_at);
            CREATE INDEX IF NOT EXISTS idx_workflows_issue_ref ON workflows(issue_ref);
            CREATE INDEX IF NOT EXISTS idx_workflows_backend_port ON workflows(backend_port);
            CREATE INDEX IF NOT EXISTS idx_workflows_frontend_port ON workflows(frontend_port);
            CREATE INDEX IF NOT EXISTS idx_workflows_issue_class ON workflows(issue_class);
            CREATE INDEX IF NOT EXISTS idx_phases_workflow ON phases(workflow_id, idx);
            CREATE INDEX IF NOT EXISTS idx_phases_state ON phases(state);
            CREATE INDEX IF NOT EXISTS idx_events_workflow ON events(workflow_id, seq);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
        "#,
    },
];

/// Apply all pending migrations in version order.
pub async fn apply(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_version WHERE version = ?1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        sqlx::raw_sql(migration.sql).execute(pool).await?;
        sqlx::query("INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(pool)
            .await?;
        info!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_apply_cleanly() {
        let pool = pool().await;
        apply(&pool).await.unwrap();

        let versions: Vec<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_version ORDER BY version")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(versions.len(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = pool().await;
        apply(&pool).await.unwrap();
        apply(&pool).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, MIGRATIONS.len() as i64);
    }
}
