use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

/// A reference to a harness-produced output, recorded by the Supervisor
/// after a caller drives `collect_artifacts` on the harness adapter. This
/// crate stores the reference only; it does not fetch or validate the
/// artifact content.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    pub ticket_id: String,
    pub artifact_type: String,
    pub uri: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub id: String,
    pub run_id: String,
    pub ticket_id: String,
    pub artifact_type: String,
    pub uri: String,
    pub metadata: Value,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    pub(crate) id: String,
    pub(crate) run_id: String,
    pub(crate) ticket_id: String,
    pub(crate) artifact_type: String,
    pub(crate) uri: String,
    pub(crate) metadata: Value,
    pub(crate) created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Self {
            id: row.id,
            run_id: row.run_id,
            ticket_id: row.ticket_id,
            artifact_type: row.artifact_type,
            uri: row.uri,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}
