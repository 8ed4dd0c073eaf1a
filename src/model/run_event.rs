use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

/// An append-only ledger row. Never mutated or deleted; ordered by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEvent {
    pub id: i64,
    pub run_id: String,
    pub ticket_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunEventRow {
    pub(crate) id: i64,
    pub(crate) run_id: String,
    pub(crate) ticket_id: String,
    pub(crate) event_type: String,
    pub(crate) payload: Value,
    pub(crate) created_at: DateTime<Utc>,
}

impl From<RunEventRow> for RunEvent {
    fn from(row: RunEventRow) -> Self {
        Self {
            id: row.id,
            run_id: row.run_id,
            ticket_id: row.ticket_id,
            event_type: row.event_type,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}
