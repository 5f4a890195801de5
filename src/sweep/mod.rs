//! Background recovery of events that did not make it to the bus.
//!
//! A pass of the sweeper:
//! - fails InProgress entries whose attempt was abandoned (crash, lost task),
//! - publishes NotPublished entries nobody picked up after commit,
//! - republishes Failed entries once their backoff elapsed.
//!
//! Every send goes through the same InProgress guard as the producer, so any
//! number of sweepers can run against one event log.

mod sweeper;
mod worker;

pub use sweeper::{RetrySweeper, SweepResult};
pub use worker::{SweepStats, SweeperHandle};
