//! Reliable publication of integration events between services.
//!
//! A producer saves its business change and the integration event in one
//! database transaction, then publishes the event once the transaction
//! committed. Every event is tracked in an event log through
//! `NotPublished -> InProgress -> Published | Failed`, and a retry sweeper
//! pushes stuck or failed events through again. Delivery is at-least-once;
//! consumers are expected to be idempotent.
//!
//! ```ignore
//! let db = InMemoryDatabase::new();
//! let bus = Arc::new(
//!     EventBus::builder(InMemoryQueue::new())
//!         .subscribe::<OrderStarted, _>(DeleteBasket::new(baskets))?
//!         .build(),
//! );
//! let service = IntegrationEventService::new(
//!     db.clone(),
//!     Arc::new(InMemoryEventLog::new(db.clone())),
//!     Arc::clone(&bus),
//!     &OutboxConfig::default(),
//! );
//!
//! let event = IntegrationEvent::new(OrderStarted { user_id });
//! service.save_event_and_changes(&event, move |tx| { /* business writes */ }).await?;
//! service.publish_through_event_bus(&event).await;
//! ```

pub mod bus;
pub mod codec;
pub mod config;
mod error;
mod event;
pub mod log;
pub mod service;
pub mod sweep;
pub mod transaction;

pub use bus::{
    handler_fn, ConsumerHandle, ConsumerStats, Delivery, DispatchOutcome, EventBus,
    EventBusBuilder, HandlerError, InMemoryQueue, IntegrationEventHandler, Message, Publisher,
    SubscribeError, Subscriber, Transport, TransportError,
};
pub use codec::{BitcodeCodec, Codec, CodecError, JsonCodec};
pub use config::{OutboxConfig, RetryPolicy, SweepConfig};
pub use error::{PersistenceError, StoreError};
pub use event::{EventPayload, IntegrationEvent};
pub use log::{EventLogEntry, EventLogStore, EventState, InMemoryEventLog};
pub use service::{IntegrationEventService, PublishOutcome};
pub use sweep::{RetrySweeper, SweepResult, SweepStats, SweeperHandle};
pub use transaction::{
    InMemoryDatabase, InMemoryTransaction, ResilientTransaction, Transaction, TransactionManager,
};
