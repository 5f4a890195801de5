//! Background consumer task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{DispatchOutcome, EventBus, Subscriber};
use crate::codec::Codec;

/// Counters accumulated by a consumer task.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub handled: usize,
    pub unknown: usize,
    pub malformed: usize,
    /// Handler failures (each one triggers a redelivery).
    pub failed: usize,
    pub polls: usize,
    pub transport_errors: usize,
}

impl ConsumerStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::UnknownEventType => self.unknown += 1,
            DispatchOutcome::Malformed => self.malformed += 1,
            DispatchOutcome::HandlerFailed => self.failed += 1,
        }
    }
}

/// Handle to a running consumer. Drop or call `stop()` to shut it down.
pub struct ConsumerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerHandle {
    /// Stop the consumer and wait for the in-progress dispatch to finish.
    ///
    /// If the task died, the failure is logged and empty stats are returned.
    pub async fn stop(mut self) -> ConsumerStats {
        self.signal_stop();
        let Some(task) = self.task.take() else {
            return ConsumerStats::default();
        };
        match task.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(error = %err, "consumer task did not finish cleanly");
                ConsumerStats::default()
            }
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

impl<T, C> EventBus<T, C>
where
    T: Subscriber + 'static,
    C: Codec,
{
    /// Spawn a task that polls the transport and dispatches every delivery.
    ///
    /// A failing message never stops the loop: handler errors and panics are
    /// nacked, transport errors are logged and polling resumes after
    /// `poll_timeout`.
    pub fn consume(self: Arc<Self>, poll_timeout: Duration) -> ConsumerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut stats = ConsumerStats::default();
            info!(subscriptions = self.subscriptions().len(), "consumer started");

            loop {
                // Only the poll is cancelled on stop; a started dispatch runs to its ack.
                let polled = tokio::select! {
                    _ = &mut stop_rx => break,
                    polled = self.transport().poll(poll_timeout) => polled,
                };
                stats.polls += 1;

                let dispatched = match polled {
                    Ok(Some(delivery)) => self.dispatch(delivery).await,
                    Ok(None) => continue,
                    Err(err) => Err(err),
                };
                match dispatched {
                    Ok(outcome) => stats.record(outcome),
                    Err(err) => {
                        stats.transport_errors += 1;
                        error!(error = %err, "consumer transport error");
                        tokio::time::sleep(poll_timeout).await;
                    }
                }
            }

            info!(
                handled = stats.handled,
                failed = stats.failed,
                polls = stats.polls,
                "consumer stopped"
            );
            stats
        });

        ConsumerHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}
