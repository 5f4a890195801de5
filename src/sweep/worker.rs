//! Periodic sweeper task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::{RetrySweeper, SweepResult};
use crate::bus::Publisher;
use crate::codec::Codec;
use crate::log::EventLogStore;
use crate::transaction::TransactionManager;

/// Totals over every pass a sweeper task ran.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub passes: usize,
    pub reconciled: usize,
    pub recovered: usize,
    pub republished: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub errors: usize,
}

impl SweepStats {
    fn add(&mut self, result: &SweepResult) {
        self.passes += 1;
        self.reconciled += result.reconciled;
        self.recovered += result.recovered;
        self.republished += result.republished;
        self.failed += result.failed;
        self.exhausted += result.exhausted;
        self.errors += result.errors;
    }
}

/// Handle to a running sweeper. Drop or call `stop()` to shut it down.
pub struct SweeperHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SweepStats>>,
}

impl SweeperHandle {
    /// Stop after the current pass and return the totals.
    ///
    /// If the task died, the failure is logged and empty totals are returned.
    pub async fn stop(mut self) -> SweepStats {
        self.signal_stop();
        let Some(task) = self.task.take() else {
            return SweepStats::default();
        };
        match task.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(error = %err, "sweeper task did not finish cleanly");
                SweepStats::default()
            }
        }
    }

    pub fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

impl<M, L, T, C> RetrySweeper<M, L, T, C>
where
    M: TransactionManager + 'static,
    L: EventLogStore<Tx = M::Tx> + 'static,
    T: Publisher + 'static,
    C: Codec,
{
    /// Run a pass every `SweepConfig::interval`, the first one immediately.
    pub fn spawn(self: Arc<Self>) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = self.config().interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = tokio::spawn(async move {
            let mut stats = SweepStats::default();
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }
                let result = self.sweep_once().await;
                stats.add(&result);
            }
            info!(
                passes = stats.passes,
                republished = stats.republished,
                exhausted = stats.exhausted,
                "sweeper stopped"
            );
            stats
        });

        SweeperHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}
