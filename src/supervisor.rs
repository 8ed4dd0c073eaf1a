//! The run state machine: dispatch, monitor, enforce limits, recover stale
//! runs. Bounded execution and the complete audit trail both fall out of
//! [`Store::transition_run`] — this type only decides *when* to call it.

use crate::backlog::Backlog;
use crate::backlog::BacklogError;
use crate::model::Run;
use crate::model::RunBudget;
use crate::model::RunState;
use crate::store::NewRunParams;
use crate::store::Store;
use crate::store::StoreError;
use chrono::Duration;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Backlog(#[from] BacklogError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The run supervisor described in `spec.md` §4.2. Claims through the same
/// [`Backlog`] a dispatcher would use directly, so a run's ticket lease
/// always gets the backlog's configured `default_lease_ttl_seconds` rather
/// than a value this type invents on its own.
pub struct RunSupervisor {
    store: Arc<dyn Store>,
    backlog: Arc<Backlog>,
    heartbeat_timeout_seconds: i64,
}

impl RunSupervisor {
    pub fn new(store: Arc<dyn Store>, backlog: Arc<Backlog>, heartbeat_timeout_seconds: i64) -> Self {
        Self {
            store,
            backlog,
            heartbeat_timeout_seconds,
        }
    }

    /// Claim `ticket_id` for `owner` and start a run against it bounded by
    /// `budget`. `Ok(None)` if the ticket could not be claimed (I2).
    pub async fn dispatch(
        &self,
        ticket_id: &str,
        owner: &str,
        harness: &str,
        budget: RunBudget,
    ) -> Result<Option<Run>, SupervisorError> {
        let Some(lease) = self.backlog.claim(ticket_id, owner).await? else {
            return Ok(None);
        };
        let run = self
            .store
            .create_run(NewRunParams {
                id: Uuid::new_v4().to_string(),
                ticket_id: ticket_id.to_string(),
                owner,
                harness: harness.to_string(),
                lease_token: lease.token,
                budget,
            })
            .await?;
        info!(run_id = %run.id, ticket_id, harness, "run dispatched");
        Ok(Some(run))
    }

    /// Transition a run to `new_state`, appending a `state_transition` event
    /// carrying `{from, to, ...payload}`. `Ok(None)` if the run doesn't
    /// exist or the transition is illegal from its current state — never an
    /// error.
    pub async fn monitor(
        &self,
        run_id: &str,
        new_state: RunState,
        token_delta: i64,
        error_message: Option<&str>,
        payload: Value,
    ) -> Result<Option<Run>, StoreError> {
        let result = self
            .store
            .transition_run(run_id, new_state, token_delta, error_message, payload)
            .await?;
        if result.is_none() {
            warn!(run_id, to = new_state.as_str(), "monitor transition rejected");
        }
        Ok(result)
    }

    /// Apply budget constraints to a run and time it out if exceeded.
    /// `token_count` is optional: callers monitoring only wall-clock elapsed
    /// time may omit it. If neither bound is exceeded and no `token_count`
    /// was supplied, the run is returned unchanged.
    pub async fn enforce_limits(
        &self,
        run_id: &str,
        token_count: Option<i64>,
    ) -> Result<Option<Run>, StoreError> {
        let Some(run) = self.store.get_run(run_id).await? else {
            return Ok(None);
        };
        if run.state.is_terminal() {
            return Ok(Some(run));
        }

        let runtime_exceeded = Utc::now() > run.started_at + Duration::minutes(run.budget.max_minutes);
        let token_exceeded = token_count.is_some_and(|count| count > run.budget.max_tokens);

        if runtime_exceeded || token_exceeded {
            let reason = if runtime_exceeded { "max_minutes" } else { "max_tokens" };
            let error_message = format!("Budget exceeded: {reason}");
            warn!(run_id, reason, "run budget exceeded, timing out");
            let token_delta = token_count.map(|count| count - run.token_count).unwrap_or(0);
            return self
                .monitor(
                    run_id,
                    RunState::TimedOut,
                    token_delta,
                    Some(&error_message),
                    json!({"reason": reason, "token_count": token_count}),
                )
                .await;
        }

        if let Some(token_count) = token_count {
            return self.store.record_budget_check(run_id, token_count).await;
        }

        Ok(Some(run))
    }

    /// Find runs whose heartbeat has gone stale (worker crashed without
    /// settling the run) and time them out.
    pub async fn recover_stale(&self) -> Result<Vec<Run>, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(self.heartbeat_timeout_seconds);
        let states = [RunState::Claimed, RunState::Running, RunState::Blocked];
        let stale_ids = self.store.list_stale_run_ids(&states, cutoff).await?;
        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = stale_ids.len(), "recovering stale runs");

        let mut recovered = Vec::with_capacity(stale_ids.len());
        for run_id in stale_ids {
            let recovered_run = self
                .monitor(
                    &run_id,
                    RunState::TimedOut,
                    0,
                    None,
                    json!({"reason": "stale_heartbeat"}),
                )
                .await?;
            if let Some(run) = recovered_run {
                recovered.push(run);
            }
        }
        Ok(recovered)
    }
}
