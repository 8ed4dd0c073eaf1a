//! In-process [`Store`] used by every test in this crate. Mirrors the
//! conditional-update semantics of [`super::postgres::PostgresStore`] under
//! a single mutex rather than database row locks.

use super::NewRunParams;
use super::Store;
use super::StoreError;
use crate::model::Artifact;
use crate::model::Lease;
use crate::model::NewArtifact;
use crate::model::NewTicket;
use crate::model::Run;
use crate::model::RunBudget;
use crate::model::RunEvent;
use crate::model::RunState;
use crate::model::Ticket;
use crate::model::TicketStatus;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    tickets: HashMap<String, Ticket>,
    leases: Vec<Lease>,
    runs: HashMap<String, Run>,
    run_events: Vec<RunEvent>,
    artifacts: Vec<Artifact>,
    next_event_id: i64,
    next_lease_id: i64,
}

impl State {
    fn append_event(&mut self, run_id: &str, ticket_id: &str, event_type: &str, payload: Value) {
        self.next_event_id += 1;
        self.run_events.push(RunEvent {
            id: self.next_event_id,
            run_id: run_id.to_string(),
            ticket_id: ticket_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            created_at: Utc::now(),
        });
    }

    /// Append a new lease audit row and return a clone of it.
    fn append_lease(&mut self, ticket_id: &str, owner: &str, token: String, expires_at: DateTime<Utc>) -> Lease {
        self.next_lease_id += 1;
        let lease = Lease {
            id: self.next_lease_id,
            ticket_id: ticket_id.to_string(),
            owner: owner.to_string(),
            token,
            created_at: Utc::now(),
            expires_at,
            released_at: None,
        };
        self.leases.push(lease.clone());
        lease
    }

    fn mirror_ticket_terminal(
        &mut self,
        ticket_id: &str,
        lease_token: &str,
        status: TicketStatus,
        reason: Option<&str>,
    ) {
        if let Some(ticket) = self.tickets.get_mut(ticket_id) {
            if ticket.status == TicketStatus::Claimed
                && ticket.lease_token.as_deref() == Some(lease_token)
            {
                ticket.status = status;
                ticket.lease_owner = None;
                ticket.lease_token = None;
                ticket.lease_expires_at = None;
                ticket.updated_at = Utc::now();
                if status == TicketStatus::Failed {
                    ticket.attempts += 1;
                    ticket.last_failure_reason = reason.map(str::to_string);
                }
            }
        }
        if let Some(lease) = self
            .leases
            .iter_mut()
            .find(|l| l.token == lease_token && l.released_at.is_none())
        {
            lease.released_at = Some(Utc::now());
        }
    }
}

/// An in-memory [`Store`] for tests. Not durable across process restarts.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .tickets
            .values()
            .find(|t| t.idempotency_key == new.idempotency_key)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let ticket = Ticket {
            id: new.id.clone(),
            source: new.source,
            r#type: new.r#type,
            priority: new.priority,
            repo: new.repo,
            context: new.context,
            acceptance_criteria: new.acceptance_criteria,
            idempotency_key: new.idempotency_key,
            status: TicketStatus::Ready,
            attempts: 0,
            lease_owner: None,
            lease_token: None,
            lease_expires_at: None,
            last_failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.tickets.insert(new.id, ticket.clone());
        Ok(ticket)
    }

    async fn fetch_ready_tickets(&self, limit: i64) -> Result<Vec<Ticket>, StoreError> {
        let state = self.state.lock().await;
        let mut ready: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Ready)
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn claim_ticket(
        &self,
        ticket_id: &str,
        owner: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(ticket) = state.tickets.get_mut(ticket_id) else {
            return Ok(None);
        };
        let claimable = ticket.status == TicketStatus::Ready
            || (ticket.status == TicketStatus::Claimed
                && ticket.lease_expires_at.is_some_and(|exp| exp < now));
        if !claimable {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        let expires_at = now + Duration::seconds(ttl_seconds);
        ticket.status = TicketStatus::Claimed;
        ticket.lease_owner = Some(owner.to_string());
        ticket.lease_token = Some(token.clone());
        ticket.lease_expires_at = Some(expires_at);
        ticket.updated_at = now;
        let lease = state.append_lease(ticket_id, owner, token, expires_at);
        Ok(Some(lease))
    }

    async fn heartbeat_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(ticket) = state.tickets.get_mut(ticket_id) else {
            return Ok(None);
        };
        let current_ok = ticket.status == TicketStatus::Claimed
            && ticket.lease_token.as_deref() == Some(lease_token)
            && ticket.lease_expires_at.is_some_and(|exp| exp >= now);
        if !current_ok {
            return Ok(None);
        }
        let expires_at = now + Duration::seconds(ttl_seconds);
        ticket.lease_expires_at = Some(expires_at);
        ticket.updated_at = now;
        let Some(lease) = state
            .leases
            .iter_mut()
            .find(|l| l.token == lease_token && l.released_at.is_none())
        else {
            return Ok(None);
        };
        lease.expires_at = expires_at;
        Ok(Some(lease.clone()))
    }

    async fn complete_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(ticket) = state.tickets.get(ticket_id) else {
            return Ok(None);
        };
        if ticket.status != TicketStatus::Claimed || ticket.lease_token.as_deref() != Some(lease_token) {
            return Ok(None);
        }
        state.mirror_ticket_terminal(ticket_id, lease_token, TicketStatus::Completed, None);
        Ok(state.tickets.get(ticket_id).cloned())
    }

    async fn fail_ticket(
        &self,
        ticket_id: &str,
        lease_token: &str,
        reason: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(ticket) = state.tickets.get(ticket_id) else {
            return Ok(None);
        };
        if ticket.status != TicketStatus::Claimed || ticket.lease_token.as_deref() != Some(lease_token) {
            return Ok(None);
        }
        state.mirror_ticket_terminal(ticket_id, lease_token, TicketStatus::Failed, Some(reason));
        Ok(state.tickets.get(ticket_id).cloned())
    }

    async fn create_run(&self, params: NewRunParams<'_>) -> Result<Run, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let run = Run {
            id: params.id.clone(),
            ticket_id: params.ticket_id.clone(),
            harness: params.harness.clone(),
            state: RunState::Claimed,
            sandbox_id: None,
            lease_token: params.lease_token,
            budget: params.budget,
            token_count: 0,
            started_at: now,
            heartbeat_at: now,
            ended_at: None,
            error_message: None,
        };
        state.runs.insert(params.id.clone(), run.clone());
        state.append_event(
            &params.id,
            &params.ticket_id,
            "run_claimed",
            json!({"owner": params.owner, "harness": params.harness}),
        );
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.runs.get(run_id).cloned())
    }

    async fn transition_run(
        &self,
        run_id: &str,
        new_state: RunState,
        token_delta: i64,
        error_message: Option<&str>,
        mut payload: Value,
    ) -> Result<Option<Run>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(run) = state.runs.get(run_id).cloned() else {
            return Ok(None);
        };
        if !run.state.can_transition_to(new_state) {
            return Ok(None);
        }

        let ticket_id = run.ticket_id.clone();
        let lease_token = run.lease_token.clone();
        if let Value::Object(ref mut map) = payload {
            map.insert("from".to_string(), json!(run.state.as_str()));
            map.insert("to".to_string(), json!(new_state.as_str()));
        }

        if let Some(run) = state.runs.get_mut(run_id) {
            run.state = new_state;
            run.token_count += token_delta;
            run.heartbeat_at = now;
            if new_state.is_terminal() {
                run.ended_at = Some(now);
            }
            if let Some(msg) = error_message {
                run.error_message = Some(msg.to_string());
            }
        }
        state.append_event(run_id, &ticket_id, "state_transition", payload);

        match new_state {
            RunState::Succeeded => {
                state.mirror_ticket_terminal(&ticket_id, &lease_token, TicketStatus::Completed, None);
            }
            RunState::Failed | RunState::TimedOut | RunState::Canceled => {
                state.mirror_ticket_terminal(
                    &ticket_id,
                    &lease_token,
                    TicketStatus::Failed,
                    Some(new_state.as_str()),
                );
            }
            _ => {}
        }

        Ok(state.runs.get(run_id).cloned())
    }

    async fn record_budget_check(
        &self,
        run_id: &str,
        token_count: i64,
    ) -> Result<Option<Run>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let ticket_id = {
            let Some(run) = state.runs.get_mut(run_id) else {
                return Ok(None);
            };
            run.token_count = token_count;
            run.heartbeat_at = now;
            run.ticket_id.clone()
        };
        state.append_event(run_id, &ticket_id, "budget_check", json!({"token_count": token_count}));
        Ok(state.runs.get(run_id).cloned())
    }

    async fn list_stale_run_ids(
        &self,
        states: &[RunState],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|r| states.contains(&r.state) && r.heartbeat_at < cutoff)
            .map(|r| r.id.clone())
            .collect())
    }

    async fn list_run_events(&self, run_id: &str) -> Result<Vec<RunEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .run_events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn record_artifact(&self, new: NewArtifact) -> Result<Artifact, StoreError> {
        let mut state = self.state.lock().await;
        let artifact = Artifact {
            id: new.id,
            run_id: new.run_id,
            ticket_id: new.ticket_id,
            artifact_type: new.artifact_type,
            uri: new.uri,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        state.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn list_artifacts_for_run(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TicketPriority;
    use pretty_assertions::assert_eq;

    fn sample_ticket(id: &str, key: &str) -> NewTicket {
        NewTicket {
            id: id.to_string(),
            source: "github".to_string(),
            r#type: "bug".to_string(),
            priority: TicketPriority::Medium,
            repo: "acme/widgets".to_string(),
            context: json!({}),
            acceptance_criteria: vec!["tests pass".to_string()],
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_on_key() {
        let store = MemoryStore::new();
        let a = store.create_ticket(sample_ticket("t1", "k1")).await.unwrap();
        let b = store.create_ticket(sample_ticket("t2", "k1")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "t1");
    }

    #[tokio::test]
    async fn only_one_claimant_wins() {
        let store = MemoryStore::new();
        store.create_ticket(sample_ticket("t1", "k1")).await.unwrap();
        let first = store.claim_ticket("t1", "worker-a", 60).await.unwrap();
        let second = store.claim_ticket("t1", "worker-b", 60).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = MemoryStore::new();
        store.create_ticket(sample_ticket("t1", "k1")).await.unwrap();
        store.claim_ticket("t1", "worker-a", -1).await.unwrap();
        let reclaimed = store.claim_ticket("t1", "worker-b", 60).await.unwrap();
        assert!(reclaimed.is_some());
        assert_eq!(reclaimed.unwrap().owner, "worker-b");
    }
}
