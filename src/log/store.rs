use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{EventLogEntry, EventState};
use crate::error::StoreError;

/// Durable event log, shared by every producer instance.
///
/// `insert` runs inside the producer's business transaction. Every other
/// write is an auto-committed conditional update on a single entry, which is
/// what keeps two instances from publishing the same event concurrently.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Transaction handle the log participates in.
    type Tx: Send;

    /// Stage a new entry in `tx`. Fails with a unique violation if an entry
    /// with the same event id exists.
    async fn insert(&self, entry: EventLogEntry, tx: &mut Self::Tx) -> Result<(), StoreError>;

    /// Move `event_id` from `from` to `to`.
    ///
    /// Returns `false` if the entry is missing or not currently in `from`.
    /// Illegal transitions are rejected with [`StoreError::InvalidTransition`].
    async fn update_state(
        &self,
        event_id: Uuid,
        from: EventState,
        to: EventState,
    ) -> Result<bool, StoreError>;

    /// Move `event_id` from `from` to Failed, recording why.
    async fn mark_failed(
        &self,
        event_id: Uuid,
        from: EventState,
        reason: &str,
    ) -> Result<bool, StoreError>;

    async fn get(&self, event_id: Uuid) -> Result<Option<EventLogEntry>, StoreError>;

    /// Failed entries whose last state change is at least `age` old, oldest first.
    async fn query_failed_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError>;

    /// InProgress entries whose attempt started at least `age` ago, oldest first.
    async fn query_in_progress_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError>;

    /// NotPublished entries at least `age` old, oldest first. These were
    /// committed but never handed to the bus, e.g. because the producer
    /// crashed right after commit.
    async fn query_not_published_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError>;

    /// NotPublished entries written by `transaction_id`, in creation order.
    async fn pending_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<EventLogEntry>, StoreError>;
}
