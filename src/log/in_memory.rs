use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{EventLogEntry, EventLogStore, EventState};
use crate::error::StoreError;
use crate::transaction::{InMemoryDatabase, InMemoryTransaction};

/// Event log kept in a table of an [`InMemoryDatabase`].
///
/// Because it lives in the same database as the business tables, an entry
/// inserted through a transaction commits or rolls back with the business
/// writes of that transaction.
#[derive(Clone)]
pub struct InMemoryEventLog {
    db: InMemoryDatabase,
}

impl InMemoryEventLog {
    pub const TABLE: &'static str = "integration_event_log";

    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }

    /// Every entry, ordered by event creation time.
    pub fn entries(&self) -> Result<Vec<EventLogEntry>, StoreError> {
        let mut entries: Vec<EventLogEntry> = self.db.scan(Self::TABLE)?;
        entries.sort_by_key(|entry| entry.creation_time);
        Ok(entries)
    }

    pub fn count_in_state(&self, state: EventState) -> Result<usize, StoreError> {
        Ok(self
            .db
            .scan::<EventLogEntry>(Self::TABLE)?
            .into_iter()
            .filter(|entry| entry.state == state)
            .count())
    }

    fn older_than(
        &self,
        state: EventState,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        let cutoff = cutoff(age);
        let mut entries: Vec<EventLogEntry> = self
            .db
            .scan::<EventLogEntry>(Self::TABLE)?
            .into_iter()
            .filter(|entry| entry.state == state && entry.state_changed_at <= cutoff)
            .collect();
        entries.sort_by_key(|entry| entry.state_changed_at);
        Ok(entries)
    }
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl EventLogStore for InMemoryEventLog {
    type Tx = InMemoryTransaction;

    async fn insert(
        &self,
        entry: EventLogEntry,
        tx: &mut InMemoryTransaction,
    ) -> Result<(), StoreError> {
        tx.insert(Self::TABLE, &entry.event_id.to_string(), &entry)
    }

    async fn update_state(
        &self,
        event_id: Uuid,
        from: EventState,
        to: EventState,
    ) -> Result<bool, StoreError> {
        let changed = self
            .db
            .update(Self::TABLE, &event_id.to_string(), |entry: &mut EventLogEntry| {
                entry.transition(from, to)
            })?;
        Ok(changed.unwrap_or(false))
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        from: EventState,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let changed = self
            .db
            .update(Self::TABLE, &event_id.to_string(), |entry: &mut EventLogEntry| {
                let changed = entry.transition(from, EventState::Failed)?;
                if changed {
                    entry.last_error = Some(reason.to_string());
                }
                Ok(changed)
            })?;
        Ok(changed.unwrap_or(false))
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<EventLogEntry>, StoreError> {
        self.db.get(Self::TABLE, &event_id.to_string())
    }

    async fn query_failed_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        self.older_than(EventState::Failed, age)
    }

    async fn query_in_progress_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        self.older_than(EventState::InProgress, age)
    }

    async fn query_not_published_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        self.older_than(EventState::NotPublished, age)
    }

    async fn pending_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<EventLogEntry>, StoreError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| {
                entry.transaction_id == transaction_id && entry.state == EventState::NotPublished
            })
            .collect())
    }
}
