use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

/// An open database transaction.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Identifier recorded on event log entries written through this transaction.
    fn id(&self) -> Uuid;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Source of new transactions (a connection pool, a database handle).
#[async_trait]
pub trait TransactionManager: Send + Sync {
    type Tx: Transaction + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
