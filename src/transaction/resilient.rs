use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{Transaction, TransactionManager};
use crate::config::RetryPolicy;
use crate::error::{PersistenceError, StoreError};

/// Runs a unit of work in one transaction, retrying the whole unit on
/// transient failures.
///
/// The work closure gets the transaction handle explicitly and may be invoked
/// several times; it must not have side effects outside the transaction.
/// Whatever happens, at most one attempt commits.
///
/// ```ignore
/// let executor = ResilientTransaction::new(db.clone(), RetryPolicy::default());
/// executor
///     .execute(|tx| Box::pin(async move {
///         tx.insert("orders", "o1", &order)?;
///         Ok::<_, StoreError>(())
///     }))
///     .await?;
/// ```
pub struct ResilientTransaction<M> {
    manager: M,
    policy: RetryPolicy,
}

impl<M: TransactionManager> ResilientTransaction<M> {
    pub fn new(manager: M, policy: RetryPolicy) -> Self {
        Self { manager, policy }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F>(&self, mut work: F) -> Result<T, PersistenceError>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut M::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(&mut work).await {
                Ok(value) => {
                    debug!(attempt, "transaction committed");
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt <= self.policy.max_retries => {
                    let backoff = self.policy.backoff_for(attempt);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying transaction"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    return Err(PersistenceError {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    async fn attempt<T, F>(&self, work: &mut F) -> Result<T, StoreError>
    where
        F: for<'t> FnMut(&'t mut M::Tx) -> BoxFuture<'t, Result<T, StoreError>>,
    {
        let mut tx = self.manager.begin().await?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
