//! Transactions with an explicit handle, and the resilient executor.
//!
//! A unit of work receives `&mut Tx` and performs every write that must
//! commit together (business rows plus the event log entry). The
//! [`ResilientTransaction`] re-runs the whole unit on transient failures.

mod in_memory;
mod resilient;
mod transaction;

pub use in_memory::{InMemoryDatabase, InMemoryTransaction};
pub use resilient::ResilientTransaction;
pub use transaction::{Transaction, TransactionManager};
