//! Receiving side of a transport.

use std::time::Duration;

use async_trait::async_trait;

use super::{Delivery, Publisher, TransportError};

/// Pull-based consumer interface.
///
/// Every delivery must eventually be acked (processed, drop it) or nacked
/// (redeliver it). Unacknowledged deliveries are redelivered by the transport.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Wait up to `timeout` for the next delivery.
    async fn poll(&self, timeout: Duration) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<(), TransportError>;
}

/// Combined trait for bidirectional transports.
pub trait Transport: Publisher + Subscriber {}

impl<T: Publisher + Subscriber> Transport for T {}
