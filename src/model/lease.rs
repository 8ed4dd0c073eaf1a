use chrono::DateTime;
use chrono::Utc;

/// A time-bounded exclusive claim on a ticket. One row is appended per
/// successful claim; `released_at` is set when the holding run settles or
/// the ticket is otherwise freed, forming the claim/release audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    pub ticket_id: String,
    pub owner: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LeaseRow {
    pub(crate) id: i64,
    pub(crate) ticket_id: String,
    pub(crate) owner: String,
    pub(crate) token: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) released_at: Option<DateTime<Utc>>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Self {
            id: row.id,
            ticket_id: row.ticket_id,
            owner: row.owner,
            token: row.token,
            created_at: row.created_at,
            expires_at: row.expires_at,
            released_at: row.released_at,
        }
    }
}
