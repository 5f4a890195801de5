//! The integration event log: one row per outgoing event, written in the
//! producing transaction, tracking delivery state.

mod entry;
mod in_memory;
mod store;

pub use entry::{EventLogEntry, EventState};
pub use in_memory::InMemoryEventLog;
pub use store::EventLogStore;
