//! PostgreSQL-backed [`Store`].
//!
//! Every conditional transition compiles to a single `UPDATE ... WHERE
//! <predicate> RETURNING *`, so the predicate check and the mutation are one
//! round trip and one row lock — the "single atomic conditional update"
//! requirement from `spec.md` §4.1 and §5. `transition_run` additionally
//! takes a `SELECT ... FOR UPDATE` row lock inside an explicit transaction
//! because it must weigh the current state against the transition table
//! before deciding what to write.

use super::NewRunParams;
use super::Store;
use super::StoreError;
use crate::model::Artifact;
use crate::model::ArtifactRow;
use crate::model::Lease;
use crate::model::LeaseRow;
use crate::model::NewArtifact;
use crate::model::NewTicket;
use crate::model::Run;
use crate::model::RunEvent;
use crate::model::RunEventRow;
use crate::model::RunRow;
use crate::model::RunState;
use crate::model::Ticket;
use crate::model::TicketRow;
use crate::model::TicketStatus;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and apply pending migrations from
    /// `migrations/`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Wrap an already-configured pool (tests, or callers doing their own
    /// connection setup).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Mirrors a run's terminal outcome onto its owning ticket and releases the
/// lease, inside the caller's transaction. Best-effort: if the ticket has
/// already moved off this lease token (a prior concurrent settle), the
/// update simply affects no rows.
async fn mirror_ticket_terminal(
    tx: &mut Transaction<'_, Postgres>,
    ticket_id: &str,
    lease_token: &str,
    status: TicketStatus,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    let now = Utc::now();
    sqlx::query(
        r#"
UPDATE tickets
SET status = $1,
    lease_owner = NULL,
    lease_token = NULL,
    lease_expires_at = NULL,
    updated_at = $2,
    attempts = attempts + $3,
    last_failure_reason = COALESCE($4, last_failure_reason)
WHERE id = $5 AND lease_token = $6 AND status = 'claimed'
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(if status == TicketStatus::Failed { 1_i64 } else { 0 })
    .bind(reason)
    .bind(ticket_id)
    .bind(lease_token)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE leases SET released_at = $1 WHERE token = $2 AND released_at IS NULL")
        .bind(now)
        .bind(lease_token)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let now = Utc::now();
        let acceptance_criteria = serde_json::to_value(&new.acceptance_criteria)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let inserted: Option<TicketRow> = sqlx::query_as::<_, TicketRow>(
            r#"
INSERT INTO tickets (
    id, source, type, priority, repo, context, acceptance_criteria,
    idempotency_key, status, attempts, created_at, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'ready', 0, $9, $9)
ON CONFLICT (idempotency_key) DO NOTHING
RETURNING *
            "#,
        )
        .bind(&new.id)
        .bind(&new.source)
        .bind(&new.r#type)
        .bind(new.priority.as_str())
        .bind(&new.repo)
        .bind(&new.context)
        .bind(&acceptance_criteria)
        .bind(&new.idempotency_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                debug!(idempotency_key = %new.idempotency_key, "ticket create raced, re-reading existing row");
                sqlx::query_as::<_, TicketRow>("SELECT * FROM tickets WHERE idempotency_key = $1")
                    .bind(&new.idempotency_key)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ticket::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn fetch_ready_tickets(&self, limit: i64) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(
            r#"
SELECT * FROM tickets
WHERE status = 'ready'
ORDER BY
    CASE priority
        WHEN 'critical' THEN 0
        WHEN 'high' THEN 1
        WHEN 'medium' THEN 2
        WHEN 'low' THEN 3
        ELSE 4
    END,
    created_at ASC,
    id ASC
LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ticket::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string())))
            .collect()
    }

    async fn claim_ticket(
        &self,
        ticket_id: &str,
        owner: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, StoreError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds);
        let token = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;
        let claimed: Option<TicketRow> = sqlx::query_as::<_, TicketRow>(
            r#"
UPDATE tickets
SET status = 'claimed', lease_owner = $1, lease_token = $2, lease_expires_at = $3, updated_at = $4
WHERE id = $5
  AND (status = 'ready' OR (status = 'claimed' AND lease_expires_at < $4))
RETURNING *
            "#,
        )
        .bind(owner)
        .bind(&token)
        .bind(expires_at)
        .bind(now)
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(_row) = claimed else {
            tx.rollback().await?;
            return Ok(None);
        };

        let lease_row = sqlx::query_as::<_, LeaseRow>(
            r#"
INSERT INTO leases (ticket_id, owner, token, expires_at, created_at)
VALUES ($1, $2, $3, $4, $5)
RETURNING *
            "#,
        )
        .bind(ticket_id)
        .bind(owner)
        .bind(&token)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Lease::from(lease_row)))
    }

    async fn heartbeat_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, StoreError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds);

        let mut tx = self.pool.begin().await?;
        let updated: Option<TicketRow> = sqlx::query_as::<_, TicketRow>(
            r#"
UPDATE tickets
SET lease_expires_at = $1, updated_at = $2
WHERE id = $3 AND status = 'claimed' AND lease_token = $4 AND lease_expires_at >= $2
RETURNING *
            "#,
        )
        .bind(expires_at)
        .bind(now)
        .bind(ticket_id)
        .bind(lease_token)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let lease_row = sqlx::query_as::<_, LeaseRow>(
            r#"
UPDATE leases SET expires_at = $1
WHERE token = $2 AND released_at IS NULL
RETURNING *
            "#,
        )
        .bind(expires_at)
        .bind(lease_token)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Lease::from(lease_row)))
    }

    async fn complete_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        self.terminal_update(ticket_id, lease_token, TicketStatus::Completed, None)
            .await
    }

    async fn fail_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
        reason: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        self.terminal_update(ticket_id, lease_token, TicketStatus::Failed, Some(reason))
            .await
    }

    async fn create_run(&self, params: NewRunParams<'_>) -> Result<Run, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, RunRow>(
            r#"
INSERT INTO runs (
    id, ticket_id, harness, state, sandbox_id, lease_token,
    max_minutes, max_tokens, token_count, started_at, heartbeat_at, ended_at, error_message
) VALUES ($1, $2, $3, 'claimed', NULL, $4, $5, $6, 0, $7, $7, NULL, NULL)
RETURNING *
            "#,
        )
        .bind(&params.id)
        .bind(&params.ticket_id)
        .bind(&params.harness)
        .bind(&params.lease_token)
        .bind(params.budget.max_minutes)
        .bind(params.budget.max_tokens)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
INSERT INTO run_events (run_id, ticket_id, event_type, payload, created_at)
VALUES ($1, $2, 'run_claimed', $3, $4)
            "#,
        )
        .bind(&params.id)
        .bind(&params.ticket_id)
        .bind(json!({"owner": params.owner, "harness": params.harness}))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Run::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Run::try_from(r).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn transition_run(
        &self,
        run_id: &str,
        new_state: RunState,
        token_delta: i64,
        error_message: Option<&str>,
        mut payload: Value,
    ) -> Result<Option<Run>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let current: Option<RunRow> =
            sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = $1 FOR UPDATE")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(None);
        };
        let current_state =
            RunState::parse(current.state.as_str()).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if !current_state.can_transition_to(new_state) {
            tx.rollback().await?;
            warn!(run_id, from = current_state.as_str(), to = new_state.as_str(), "invalid run transition rejected");
            return Ok(None);
        }

        let row = sqlx::query_as::<_, RunRow>(
            r#"
UPDATE runs
SET state = $1,
    token_count = token_count + $2,
    heartbeat_at = $3,
    ended_at = CASE WHEN $4 THEN $3 ELSE ended_at END,
    error_message = COALESCE($5, error_message)
WHERE id = $6
RETURNING *
            "#,
        )
        .bind(new_state.as_str())
        .bind(token_delta)
        .bind(now)
        .bind(new_state.is_terminal())
        .bind(error_message)
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;

        if let Value::Object(ref mut map) = payload {
            map.insert("from".to_string(), json!(current_state.as_str()));
            map.insert("to".to_string(), json!(new_state.as_str()));
        }
        sqlx::query(
            "INSERT INTO run_events (run_id, ticket_id, event_type, payload, created_at) VALUES ($1, $2, 'state_transition', $3, $4)",
        )
        .bind(run_id)
        .bind(&row.ticket_id)
        .bind(&payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        match new_state {
            RunState::Succeeded => {
                mirror_ticket_terminal(
                    &mut tx,
                    &row.ticket_id,
                    &row.lease_token,
                    TicketStatus::Completed,
                    None,
                )
                .await?;
            }
            RunState::Failed | RunState::TimedOut | RunState::Canceled => {
                mirror_ticket_terminal(
                    &mut tx,
                    &row.ticket_id,
                    &row.lease_token,
                    TicketStatus::Failed,
                    Some(new_state.as_str()),
                )
                .await?;
            }
            _ => {}
        }

        tx.commit().await?;
        debug!(run_id, to = new_state.as_str(), "run transitioned");
        Run::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string())).map(Some)
    }

    async fn record_budget_check(
        &self,
        run_id: &str,
        token_count: i64,
    ) -> Result<Option<Run>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row: Option<RunRow> = sqlx::query_as::<_, RunRow>(
            "UPDATE runs SET token_count = $1, heartbeat_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(token_count)
        .bind(now)
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO run_events (run_id, ticket_id, event_type, payload, created_at) VALUES ($1, $2, 'budget_check', $3, $4)",
        )
        .bind(run_id)
        .bind(&row.ticket_id)
        .bind(json!({"token_count": token_count}))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Run::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string())).map(Some)
    }

    async fn list_stale_run_ids(
        &self,
        states: &[RunState],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let state_strs: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query("SELECT id FROM runs WHERE state = ANY($1) AND heartbeat_at < $2")
            .bind(state_strs)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get::<String, _>("id").map_err(StoreError::from))
            .collect()
    }

    async fn list_run_events(&self, run_id: &str) -> Result<Vec<RunEvent>, StoreError> {
        let rows = sqlx::query_as::<_, RunEventRow>(
            "SELECT * FROM run_events WHERE run_id = $1 ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunEvent::from).collect())
    }

    async fn record_artifact(&self, new: NewArtifact) -> Result<Artifact, StoreError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
INSERT INTO artifacts (id, run_id, ticket_id, artifact_type, uri, metadata, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
RETURNING *
            "#,
        )
        .bind(&new.id)
        .bind(&new.run_id)
        .bind(&new.ticket_id)
        .bind(&new.artifact_type)
        .bind(&new.uri)
        .bind(&new.metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(Artifact::from(row))
    }

    async fn list_artifacts_for_run(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError> {
        let rows = sqlx::query_as::<_, ArtifactRow>(
            "SELECT * FROM artifacts WHERE run_id = $1 ORDER BY created_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Artifact::from).collect())
    }
}

impl PostgresStore {
    async fn terminal_update(
        &self,
        ticket_id: &str,
        lease_token: &str,
        status: TicketStatus,
        reason: Option<&str>,
    ) -> Result<Option<Ticket>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row: Option<TicketRow> = sqlx::query_as::<_, TicketRow>(
            r#"
UPDATE tickets
SET status = $1,
    lease_owner = NULL,
    lease_token = NULL,
    lease_expires_at = NULL,
    updated_at = $2,
    attempts = attempts + $3,
    last_failure_reason = COALESCE($4, last_failure_reason)
WHERE id = $5 AND lease_token = $6 AND status = 'claimed'
RETURNING *
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(if status == TicketStatus::Failed { 1_i64 } else { 0 })
        .bind(reason)
        .bind(ticket_id)
        .bind(lease_token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE leases SET released_at = $1 WHERE token = $2 AND released_at IS NULL")
            .bind(now)
            .bind(lease_token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ticket::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string())).map(Some)
    }
}
