use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::bus::Publisher;
use crate::codec::Codec;
use crate::config::SweepConfig;
use crate::log::{EventLogEntry, EventLogStore, EventState};
use crate::service::{IntegrationEventService, PublishOutcome};
use crate::transaction::TransactionManager;

const ABANDONED: &str = "publish attempt abandoned";

/// Slack past the publish timeout for the attempt to record its result.
const RECONCILE_MARGIN: Duration = Duration::from_millis(100);

/// Counts from a single sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    /// Stale InProgress entries moved to Failed.
    pub reconciled: usize,
    /// Orphaned NotPublished entries that were published.
    pub recovered: usize,
    /// Failed entries that were published.
    pub republished: usize,
    /// Attempts made by this pass that failed again.
    pub failed: usize,
    /// Entries another attempt claimed first.
    pub skipped: usize,
    /// Failed entries that reached `max_attempts`.
    pub exhausted: usize,
    /// Event log errors.
    pub errors: usize,
}

impl SweepResult {
    /// Whether the pass changed or attempted anything.
    pub fn did_work(&self) -> bool {
        self.reconciled + self.recovered + self.republished + self.failed > 0
    }

    fn record(&mut self, outcome: &PublishOutcome, from: EventState) {
        match (outcome, from) {
            (PublishOutcome::Published, EventState::NotPublished) => self.recovered += 1,
            (PublishOutcome::Published, _) => self.republished += 1,
            (PublishOutcome::Failed { .. }, _) => self.failed += 1,
            (PublishOutcome::Skipped { .. }, _) => self.skipped += 1,
        }
    }
}

/// Finds entries stuck before Published and pushes them through again.
pub struct RetrySweeper<M, L, T, C> {
    service: Arc<IntegrationEventService<M, L, T, C>>,
    config: SweepConfig,
}

impl<M, L, T, C> RetrySweeper<M, L, T, C>
where
    M: TransactionManager,
    L: EventLogStore<Tx = M::Tx> + 'static,
    T: Publisher,
    C: Codec,
{
    pub fn new(service: Arc<IntegrationEventService<M, L, T, C>>, config: SweepConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<IntegrationEventService<M, L, T, C>> {
        &self.service
    }

    /// Run one pass. Event log errors are logged and counted; the pass
    /// continues with whatever it could load.
    pub async fn sweep_once(&self) -> SweepResult {
        let mut result = SweepResult::default();
        self.reconcile_abandoned(&mut result).await;

        let mut budget = self.config.batch_size;
        self.recover_orphans(&mut budget, &mut result).await;
        self.republish_failed(&mut budget, &mut result).await;

        if result.did_work() || result.exhausted > 0 {
            info!(
                reconciled = result.reconciled,
                recovered = result.recovered,
                republished = result.republished,
                failed = result.failed,
                exhausted = result.exhausted,
                "sweep pass finished"
            );
        } else {
            debug!("sweep pass found nothing to do");
        }
        result
    }

    /// Age after which an InProgress entry counts as abandoned.
    ///
    /// Never shorter than the publish timeout plus a margin, so a live attempt
    /// is not taken back while the transport may still accept it.
    pub fn reconcile_after(&self) -> Duration {
        let floor = self.service.publish_timeout() + RECONCILE_MARGIN;
        self.config.in_progress_timeout.max(floor)
    }

    async fn reconcile_abandoned(&self, result: &mut SweepResult) {
        let log = self.service.log();
        let stale = match log.query_in_progress_older_than(self.reconcile_after()).await
        {
            Ok(stale) => stale,
            Err(err) => {
                error!(error = %err, "failed to query in-progress entries");
                result.errors += 1;
                return;
            }
        };

        for entry in stale {
            match log
                .mark_failed(entry.event_id, EventState::InProgress, ABANDONED)
                .await
            {
                Ok(true) => {
                    warn!(
                        event_id = %entry.event_id,
                        event_type = %entry.event_type_name,
                        attempt = entry.times_sent,
                        "in-progress publish abandoned, marked failed"
                    );
                    result.reconciled += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    error!(event_id = %entry.event_id, error = %err, "failed to reconcile entry");
                    result.errors += 1;
                }
            }
        }
    }

    async fn recover_orphans(&self, budget: &mut usize, result: &mut SweepResult) {
        let orphans = match self
            .service
            .log()
            .query_not_published_older_than(self.config.in_progress_timeout)
            .await
        {
            Ok(orphans) => orphans,
            Err(err) => {
                error!(error = %err, "failed to query unpublished entries");
                result.errors += 1;
                return;
            }
        };

        for entry in orphans {
            if *budget == 0 {
                return;
            }
            *budget -= 1;
            warn!(
                event_id = %entry.event_id,
                event_type = %entry.event_type_name,
                "publishing orphaned event"
            );
            let outcome = self.service.retry(&entry).await;
            result.record(&outcome, EventState::NotPublished);
        }
    }

    async fn republish_failed(&self, budget: &mut usize, result: &mut SweepResult) {
        let failed = match self
            .service
            .log()
            .query_failed_older_than(self.config.retry_after)
            .await
        {
            Ok(failed) => failed,
            Err(err) => {
                error!(error = %err, "failed to query failed entries");
                result.errors += 1;
                return;
            }
        };

        for entry in failed {
            if entry.times_sent >= self.config.max_attempts {
                error!(
                    event_id = %entry.event_id,
                    event_type = %entry.event_type_name,
                    attempts = entry.times_sent,
                    last_error = entry.last_error.as_deref().unwrap_or_default(),
                    "giving up on integration event"
                );
                result.exhausted += 1;
                continue;
            }
            if !self.is_due(&entry) {
                continue;
            }
            if *budget == 0 {
                return;
            }
            *budget -= 1;

            debug!(
                event_id = %entry.event_id,
                attempt = entry.times_sent + 1,
                "retrying failed event"
            );
            let outcome = self.service.retry(&entry).await;
            result.record(&outcome, EventState::Failed);
        }
    }

    /// Failed long enough for its attempt count.
    fn is_due(&self, entry: &EventLogEntry) -> bool {
        let delay = self.config.retry_delay(entry.times_sent);
        Utc::now()
            .signed_duration_since(entry.state_changed_at)
            .to_std()
            .map(|elapsed| elapsed >= delay)
            .unwrap_or(delay == Duration::ZERO)
    }
}
