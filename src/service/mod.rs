//! Producer side of the pipeline: save the business change and its event in
//! one transaction, then publish after commit.

mod integration_event_service;
mod outcome;

pub use integration_event_service::IntegrationEventService;
pub use outcome::PublishOutcome;
