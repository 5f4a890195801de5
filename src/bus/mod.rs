//! Event bus - typed publish/subscribe over a pluggable transport.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    EventBus (per service)                    │
//! │  publish(event) ─► encode ─► Publisher::publish(message)     │
//! │  consume() ─► Subscriber::poll ─► registry ─► handler        │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Publisher + Subscriber traits                   │
//! │  Publisher: publish(message)                                 │
//! │  Subscriber: poll(timeout) / ack(delivery) / nack(delivery)  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌─────────────────┐               ┌─────────────────────────┐
//! │  InMemoryQueue  │               │ RabbitMQ, Kafka, ...    │
//! │   (included)    │               │      (external)         │
//! └─────────────────┘               └─────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: a message whose handler fails is nacked and
//! redelivered by the transport, so handlers must be idempotent.

mod consumer;
mod event_bus;
mod handler;
mod in_memory_queue;
mod message;
mod publisher;
mod registry;
mod subscriber;

pub use consumer::{ConsumerHandle, ConsumerStats};
pub use event_bus::{DispatchOutcome, EventBus, EventBusBuilder};
pub use handler::{handler_fn, FnHandler, HandlerError, IntegrationEventHandler};
pub use in_memory_queue::InMemoryQueue;
pub use message::{Delivery, Message};
pub use publisher::{Publisher, TransportError};
pub use registry::{SubscribeError, SubscriptionRegistry};
pub use subscriber::{Subscriber, Transport};
