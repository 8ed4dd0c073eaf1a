//! The abstract persistence capability Backlog and Supervisor are built
//! against, per the "abstract store session" design note in `spec.md` §9.
//!
//! [`Store`] is implemented by [`postgres::PostgresStore`] (production) and
//! [`memory::MemoryStore`] (in-process, used by every test in this crate).
//! Neither `Backlog` nor `RunSupervisor` ever reaches past this trait into a
//! concrete driver.

mod error;
mod memory;
mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::model::Artifact;
use crate::model::Lease;
use crate::model::NewArtifact;
use crate::model::NewTicket;
use crate::model::Run;
use crate::model::RunBudget;
use crate::model::RunEvent;
use crate::model::RunState;
use crate::model::Ticket;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

/// Parameters for creating a run, mirroring `dispatch`'s steps 2-3 in
/// `spec.md` §4.2 (run row + `run_claimed` event, one transaction).
#[derive(Debug, Clone)]
pub struct NewRunParams<'a> {
    pub id: String,
    pub ticket_id: String,
    pub owner: &'a str,
    pub harness: String,
    pub lease_token: String,
    pub budget: RunBudget,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ---- Backlog operations (spec.md §4.1) ----

    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError>;

    async fn fetch_ready_tickets(&self, limit: i64) -> Result<Vec<Ticket>, StoreError>;

    async fn claim_ticket(
        &self,
        ticket_id: &str,
        owner: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, StoreError>;

    async fn heartbeat_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, StoreError>;

    async fn complete_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
    ) -> Result<Option<Ticket>, StoreError>;

    async fn fail_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
        reason: &str,
    ) -> Result<Option<Ticket>, StoreError>;

    // ---- Run Supervisor operations (spec.md §4.2) ----

    async fn create_run(&self, params: NewRunParams<'_>) -> Result<Run, StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// Implements `monitor`: validates `current_state -> new_state` against
    /// the transition table, then atomically updates the run, appends a
    /// `state_transition` event, and — for terminal states — mirrors the
    /// outcome onto the owning ticket and releases its lease, all in one
    /// transaction. Returns `Ok(None)` for a missing run or an illegal
    /// transition (no mutation, no event written in either case).
    async fn transition_run(
        &self,
        run_id: &str,
        new_state: RunState,
        token_delta: i64,
        error_message: Option<&str>,
        payload: Value,
    ) -> Result<Option<Run>, StoreError>;

    /// Implements the non-terminating branch of `enforce_limits`: records an
    /// observed token count and appends a `budget_check` event without
    /// changing run state.
    async fn record_budget_check(
        &self,
        run_id: &str,
        token_count: i64,
    ) -> Result<Option<Run>, StoreError>;

    /// Runs whose `state` is one of `states` and `heartbeat_at < cutoff`,
    /// for `recover_stale`.
    async fn list_stale_run_ids(
        &self,
        states: &[RunState],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    async fn list_run_events(&self, run_id: &str) -> Result<Vec<RunEvent>, StoreError>;

    async fn record_artifact(&self, new: NewArtifact) -> Result<Artifact, StoreError>;

    async fn list_artifacts_for_run(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError>;
}
