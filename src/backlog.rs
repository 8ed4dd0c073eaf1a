//! The durable ticket store: create, fetch-ready, claim, heartbeat,
//! complete, fail. Every operation delegates straight to a [`Store`]; this
//! type only owns validation and the default lease TTL.

use crate::errors::ValidationError;
use crate::model::Lease;
use crate::model::NewTicket;
use crate::model::Ticket;
use crate::store::Store;
use crate::store::StoreError;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BacklogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The durable backlog described in `spec.md` §4.1: a single active lease
/// per ticket, enforced entirely by the backing [`Store`]'s conditional
/// updates.
pub struct Backlog {
    store: Arc<dyn Store>,
    default_lease_ttl_seconds: i64,
}

impl Backlog {
    pub fn new(store: Arc<dyn Store>, default_lease_ttl_seconds: i64) -> Self {
        Self {
            store,
            default_lease_ttl_seconds,
        }
    }

    /// Create a ticket, or return the existing one if `idempotency_key`
    /// already names a ticket (I1).
    pub async fn create(&self, new: NewTicket) -> Result<Ticket, BacklogError> {
        new.validate()?;
        let ticket = self.store.create_ticket(new).await?;
        debug!(ticket_id = %ticket.id, "ticket created");
        Ok(ticket)
    }

    /// Tickets eligible for dispatch, highest priority and oldest first.
    pub async fn fetch_ready(&self, limit: i64) -> Result<Vec<Ticket>, BacklogError> {
        if limit <= 0 {
            return Err(ValidationError::NonPositiveLimit(limit).into());
        }
        Ok(self.store.fetch_ready_tickets(limit).await?)
    }

    /// Attempt to claim a ticket for `owner`. `Ok(None)` means someone else
    /// holds an unexpired lease, or the ticket does not exist — both are
    /// ordinary outcomes, never an error (I2).
    pub async fn claim(&self, ticket_id: &str, owner: &str) -> Result<Option<Lease>, BacklogError> {
        self.claim_with_ttl(ticket_id, owner, self.default_lease_ttl_seconds)
            .await
    }

    pub async fn claim_with_ttl(
        &self,
        ticket_id: &str,
        owner: &str,
        ttl_seconds: i64,
    ) -> Result<Option<Lease>, BacklogError> {
        let lease = self.store.claim_ticket(ticket_id, owner, ttl_seconds).await?;
        if lease.is_none() {
            debug!(ticket_id, owner, "claim missed: no eligible lease");
        }
        Ok(lease)
    }

    /// Extend a held lease. `Ok(None)` if `lease_token` no longer matches
    /// the ticket's current lease (expired, stolen, or already settled).
    pub async fn heartbeat(
        &self,
        ticket_id: &str,
        lease_token: &str,
    ) -> Result<Option<Lease>, BacklogError> {
        Ok(self
            .store
            .heartbeat_ticket(ticket_id, lease_token, self.default_lease_ttl_seconds)
            .await?)
    }

    /// Mark a ticket completed. Does not increment `attempts` (I3).
    pub async fn complete(
        &self,
        ticket_id: &str,
        lease_token: &str,
    ) -> Result<Option<Ticket>, BacklogError> {
        let result = self.store.complete_ticket(ticket_id, lease_token).await?;
        if result.is_none() {
            warn!(ticket_id, "complete rejected: lease token stale or ticket not claimed");
        }
        Ok(result)
    }

    /// Mark a ticket failed. Increments `attempts` and records `reason`.
    pub async fn fail(
        &self,
        ticket_id: &str,
        lease_token: &str,
        reason: &str,
    ) -> Result<Option<Ticket>, BacklogError> {
        let result = self.store.fail_ticket(ticket_id, lease_token, reason).await?;
        if result.is_none() {
            warn!(ticket_id, "fail rejected: lease token stale or ticket not claimed");
        }
        Ok(result)
    }
}
