use crate::errors::ValidationError;
use chrono::DateTime;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Claimed,
    Running,
    Blocked,
    AwaitingApproval,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl RunState {
    pub const fn as_str(self) -> &'static str {
        match self {
            RunState::Claimed => "claimed",
            RunState::Running => "running",
            RunState::Blocked => "blocked",
            RunState::AwaitingApproval => "awaiting_approval",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::TimedOut => "timed_out",
            RunState::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "claimed" => Ok(Self::Claimed),
            "running" => Ok(Self::Running),
            "blocked" => Ok(Self::Blocked),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "canceled" => Ok(Self::Canceled),
            other => Err(anyhow::anyhow!("invalid run state: {other}")),
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::TimedOut | RunState::Canceled
        )
    }

    /// Whether `self -> next` is a legal transition per the state machine in
    /// `spec.md` §4.2. No transition is legal out of a terminal state.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Claimed, Running)
                | (Claimed, Canceled)
                | (Claimed, TimedOut)
                | (Claimed, Failed)
                | (Running, Blocked)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Canceled)
                | (Running, AwaitingApproval)
                | (Blocked, Running)
                | (Blocked, Canceled)
                | (Blocked, TimedOut)
                | (Blocked, Failed)
                | (AwaitingApproval, Running)
                | (AwaitingApproval, Canceled)
                | (AwaitingApproval, TimedOut)
        )
    }
}

/// Wall-clock and token budget bounding a run's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    pub max_minutes: i64,
    pub max_tokens: i64,
}

impl RunBudget {
    pub fn new(max_minutes: i64, max_tokens: i64) -> Result<Self, ValidationError> {
        if max_minutes <= 0 {
            return Err(ValidationError::NonPositiveMaxMinutes(max_minutes));
        }
        if max_tokens <= 0 {
            return Err(ValidationError::NonPositiveMaxTokens(max_tokens));
        }
        Ok(Self {
            max_minutes,
            max_tokens,
        })
    }
}

/// A single execution attempt against a ticket by an agent harness.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub id: String,
    pub ticket_id: String,
    pub harness: String,
    pub state: RunState,
    pub sandbox_id: Option<String>,
    pub lease_token: String,
    pub budget: RunBudget,
    pub token_count: i64,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub(crate) id: String,
    pub(crate) ticket_id: String,
    pub(crate) harness: String,
    pub(crate) state: String,
    pub(crate) sandbox_id: Option<String>,
    pub(crate) lease_token: String,
    pub(crate) max_minutes: i64,
    pub(crate) max_tokens: i64,
    pub(crate) token_count: i64,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) heartbeat_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) error_message: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = anyhow::Error;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            harness: row.harness,
            state: RunState::parse(row.state.as_str())?,
            sandbox_id: row.sandbox_id,
            lease_token: row.lease_token,
            budget: RunBudget {
                max_minutes: row.max_minutes,
                max_tokens: row.max_tokens,
            },
            token_count: row.token_count,
            started_at: row.started_at,
            heartbeat_at: row.heartbeat_at,
            ended_at: row.ended_at,
            error_message: row.error_message,
        })
    }
}
