//! Synchronous validation errors for malformed input.
//!
//! These are the `VALIDATION` kind from the error taxonomy: they never touch
//! the store and are returned (not logged) directly to the caller.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("idempotency_key must not be empty")]
    EmptyIdempotencyKey,

    #[error("ticket id must not be empty")]
    EmptyTicketId,

    #[error("max_minutes must be positive, got {0}")]
    NonPositiveMaxMinutes(i64),

    #[error("max_tokens must be positive, got {0}")]
    NonPositiveMaxTokens(i64),

    #[error("limit must be positive, got {0}")]
    NonPositiveLimit(i64),
}
