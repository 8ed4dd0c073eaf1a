use crate::errors::ValidationError;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TicketPriority {
    pub const fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Critical => "critical",
            TicketPriority::High => "high",
            TicketPriority::Medium => "medium",
            TicketPriority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(anyhow::anyhow!("invalid ticket priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Ready,
    Claimed,
    Completed,
    Failed,
}

impl TicketStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Ready => "ready",
            TicketStatus::Claimed => "claimed",
            TicketStatus::Completed => "completed",
            TicketStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "ready" => Ok(Self::Ready),
            "claimed" => Ok(Self::Claimed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("invalid ticket status: {other}")),
        }
    }
}

/// A persisted backlog ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: String,
    pub source: String,
    pub r#type: String,
    pub priority: TicketPriority,
    pub repo: String,
    pub context: Value,
    pub acceptance_criteria: Vec<String>,
    pub idempotency_key: String,
    pub status: TicketStatus,
    pub attempts: i64,
    pub lease_owner: Option<String>,
    pub lease_token: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for [`crate::backlog::Backlog::create`].
///
/// `id` is a suggestion only: if a ticket with the same `idempotency_key`
/// already exists, the existing row's `id` wins (see `spec.md` I1).
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: String,
    pub source: String,
    pub r#type: String,
    pub priority: TicketPriority,
    pub repo: String,
    pub context: Value,
    pub acceptance_criteria: Vec<String>,
    pub idempotency_key: String,
}

impl NewTicket {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.idempotency_key.is_empty() {
            return Err(ValidationError::EmptyIdempotencyKey);
        }
        if self.id.is_empty() {
            return Err(ValidationError::EmptyTicketId);
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TicketRow {
    pub(crate) id: String,
    pub(crate) source: String,
    #[sqlx(rename = "type")]
    pub(crate) r#type: String,
    pub(crate) priority: String,
    pub(crate) repo: String,
    pub(crate) context: Value,
    pub(crate) acceptance_criteria: Value,
    pub(crate) idempotency_key: String,
    pub(crate) status: String,
    pub(crate) attempts: i64,
    pub(crate) lease_owner: Option<String>,
    pub(crate) lease_token: Option<String>,
    pub(crate) lease_expires_at: Option<DateTime<Utc>>,
    pub(crate) last_failure_reason: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = anyhow::Error;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let acceptance_criteria = serde_json::from_value(row.acceptance_criteria)?;
        Ok(Self {
            id: row.id,
            source: row.source,
            r#type: row.r#type,
            priority: TicketPriority::parse(row.priority.as_str())?,
            repo: row.repo,
            context: row.context,
            acceptance_criteria,
            idempotency_key: row.idempotency_key,
            status: TicketStatus::parse(row.status.as_str())?,
            attempts: row.attempts,
            lease_owner: row.lease_owner,
            lease_token: row.lease_token,
            lease_expires_at: row.lease_expires_at,
            last_failure_reason: row.last_failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
