use thiserror::Error;
use uuid::Uuid;

use crate::log::EventState;

/// Errors raised by the storage layer (business tables and the event log).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Infrastructure failure expected to resolve on retry (deadlock, dropped connection).
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("unique constraint violated on {table} for key {key}")]
    UniqueViolation { table: String, key: String },
    #[error("illegal state transition for event {event_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        event_id: Uuid,
        from: EventState,
        to: EventState,
    },
    #[error("{table} row {key} not found")]
    NotFound { table: String, key: String },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("storage lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("storage failure: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Whether the whole transaction may be retried from the start.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A transaction that could not be committed.
///
/// Returned to the business caller; neither the business writes nor the
/// event log entry were applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transaction failed after {attempts} attempt(s): {source}")]
pub struct PersistenceError {
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}
