use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::PublishOutcome;
use crate::bus::{EventBus, Publisher};
use crate::codec::Codec;
use crate::config::OutboxConfig;
use crate::error::{PersistenceError, StoreError};
use crate::event::{EventPayload, IntegrationEvent};
use crate::log::{EventLogEntry, EventLogStore, EventState};
use crate::transaction::{ResilientTransaction, Transaction, TransactionManager};

/// Saves business changes together with their integration events and
/// publishes those events once the transaction committed.
///
/// ```ignore
/// let tx_id = service
///     .save_event_and_changes(&event, move |tx| {
///         let order = order.clone();
///         Box::pin(async move {
///             tx.insert("orders", &order.id, &order)?;
///             Ok(())
///         })
///     })
///     .await?;
///
/// // after commit
/// let outcome = service.publish_through_event_bus(&event).await;
/// ```
pub struct IntegrationEventService<M, L, T, C> {
    executor: ResilientTransaction<M>,
    log: Arc<L>,
    bus: Arc<EventBus<T, C>>,
    publish_timeout: Duration,
}

impl<M, L, T, C> IntegrationEventService<M, L, T, C>
where
    M: TransactionManager,
    L: EventLogStore<Tx = M::Tx> + 'static,
    T: Publisher,
    C: Codec,
{
    pub fn new(manager: M, log: Arc<L>, bus: Arc<EventBus<T, C>>, config: &OutboxConfig) -> Self {
        Self {
            executor: ResilientTransaction::new(manager, config.retry.clone()),
            log,
            bus,
            publish_timeout: config.publish_timeout,
        }
    }

    /// Executor for business transactions that raise no event.
    pub fn executor(&self) -> &ResilientTransaction<M> {
        &self.executor
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub fn bus(&self) -> &Arc<EventBus<T, C>> {
        &self.bus
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// Run `work` and record `event` as NotPublished in the same transaction.
    ///
    /// Transient failures rerun the whole unit, `work` included. Either both the
    /// business writes and the log entry commit, or neither does. Returns the
    /// id of the committed transaction.
    pub async fn save_event_and_changes<P, F>(
        &self,
        event: &IntegrationEvent<P>,
        work: F,
    ) -> Result<Uuid, PersistenceError>
    where
        P: EventPayload,
        F: Fn(&mut M::Tx) -> BoxFuture<'_, Result<(), StoreError>> + Send + Sync + 'static,
    {
        let message = self.bus.encode(event).map_err(|err| PersistenceError {
            attempts: 0,
            source: StoreError::Serialization(err.to_string()),
        })?;
        let work = Arc::new(work);
        let log = Arc::clone(&self.log);

        let transaction_id = self
            .executor
            .execute(move |tx| {
                let work = Arc::clone(&work);
                let log = Arc::clone(&log);
                let message = message.clone();
                Box::pin(async move {
                    work(&mut *tx).await?;
                    let transaction_id = tx.id();
                    log.insert(EventLogEntry::new(&message, transaction_id), tx)
                        .await?;
                    Ok::<_, StoreError>(transaction_id)
                })
            })
            .await?;

        debug!(
            event_id = %event.id(),
            event_type = P::EVENT_TYPE,
            %transaction_id,
            "integration event saved"
        );
        Ok(transaction_id)
    }

    /// Publish a committed event through the bus and record the result.
    ///
    /// Only an entry still NotPublished is sent; anything else is reported as
    /// skipped. Publication failures are recorded on the entry, never returned.
    pub async fn publish_through_event_bus<P: EventPayload>(
        &self,
        event: &IntegrationEvent<P>,
    ) -> PublishOutcome {
        let entry = match self.log.get(event.id()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(
                    event_id = %event.id(),
                    "no log entry for event, was the transaction committed?"
                );
                return PublishOutcome::Skipped { state: None };
            }
            Err(err) => {
                error!(event_id = %event.id(), error = %err, "failed to load event log entry");
                return PublishOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        if entry.state != EventState::NotPublished {
            debug!(event_id = %entry.event_id, state = ?entry.state, "event already handled");
            return PublishOutcome::Skipped {
                state: Some(entry.state),
            };
        }
        self.claim_and_send(entry).await
    }

    /// Publish every NotPublished event written by `transaction_id`.
    pub async fn publish_pending_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<(Uuid, PublishOutcome)>, StoreError> {
        let pending = self.log.pending_for_transaction(transaction_id).await?;
        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            let event_id = entry.event_id;
            outcomes.push((event_id, self.claim_and_send(entry).await));
        }
        Ok(outcomes)
    }

    /// Re-attempt an entry that is Failed, or NotPublished and abandoned.
    pub async fn retry(&self, entry: &EventLogEntry) -> PublishOutcome {
        match entry.state {
            EventState::Failed | EventState::NotPublished => {
                self.claim_and_send(entry.clone()).await
            }
            state => PublishOutcome::Skipped { state: Some(state) },
        }
    }

    /// Take the InProgress guard from the entry's current state, then send.
    async fn claim_and_send(&self, entry: EventLogEntry) -> PublishOutcome {
        let event_id = entry.event_id;
        match self
            .log
            .update_state(event_id, entry.state, EventState::InProgress)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let state = self.current_state(event_id).await;
                debug!(%event_id, ?state, "publish guard lost to another attempt");
                return PublishOutcome::Skipped { state };
            }
            Err(err) => {
                error!(%event_id, error = %err, "failed to mark event in progress");
                return PublishOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        }

        let attempt = entry.times_sent + 1;
        let sent = tokio::time::timeout(
            self.publish_timeout,
            self.bus.publish_message(entry.to_message()),
        )
        .await;

        let reason = match sent {
            Ok(Ok(())) => return self.mark_published(&entry, attempt).await,
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("publish timed out after {:?}", self.publish_timeout),
        };

        warn!(
            %event_id,
            event_type = %entry.event_type_name,
            attempt,
            reason = %reason,
            "publishing integration event failed"
        );
        match self
            .log
            .mark_failed(event_id, EventState::InProgress, &reason)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(%event_id, "entry left InProgress before it could be marked failed"),
            Err(err) => error!(%event_id, error = %err, "failed to mark event failed"),
        }
        PublishOutcome::Failed { reason }
    }

    async fn mark_published(&self, entry: &EventLogEntry, attempt: u32) -> PublishOutcome {
        let event_id = entry.event_id;
        match self
            .log
            .update_state(event_id, EventState::InProgress, EventState::Published)
            .await
        {
            Ok(true) => info!(
                %event_id,
                event_type = %entry.event_type_name,
                attempt,
                "integration event marked published"
            ),
            // The sweeper reconciled the attempt meanwhile; it will resend.
            Ok(false) => warn!(%event_id, "published, but entry was no longer InProgress"),
            // Stays InProgress until the sweeper reconciles it.
            Err(err) => error!(%event_id, error = %err, "published, but failed to record it"),
        }
        PublishOutcome::Published
    }

    async fn current_state(&self, event_id: Uuid) -> Option<EventState> {
        match self.log.get(event_id).await {
            Ok(entry) => entry.map(|entry| entry.state),
            Err(err) => {
                warn!(%event_id, error = %err, "failed to reload event log entry");
                None
            }
        }
    }
}
