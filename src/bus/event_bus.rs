use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::registry::RouteFailure;
use super::{
    Delivery, IntegrationEventHandler, Message, Publisher, SubscribeError, Subscriber,
    SubscriptionRegistry, TransportError,
};
use crate::codec::{Codec, CodecError, JsonCodec};
use crate::event::{EventPayload, IntegrationEvent};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler succeeded; acked.
    Handled,
    /// No handler for the type tag; acked and discarded.
    UnknownEventType,
    /// Payload did not decode; acked and discarded.
    Malformed,
    /// Handler returned an error or panicked; nacked for redelivery.
    HandlerFailed,
}

/// Publishes integration events and dispatches deliveries to handlers.
///
/// ```ignore
/// let bus = EventBus::builder(InMemoryQueue::new())
///     .subscribe::<OrderStarted, _>(OrderStartedHandler::new(baskets))?
///     .build();
///
/// bus.publish(&IntegrationEvent::new(OrderStarted { .. })).await?;
/// let consumer = Arc::new(bus).consume(Duration::from_millis(50));
/// ```
pub struct EventBus<T, C = JsonCodec> {
    transport: T,
    codec: C,
    registry: SubscriptionRegistry,
}

/// Collects subscriptions; the registry is fixed once `build` is called.
pub struct EventBusBuilder<T, C = JsonCodec> {
    transport: T,
    codec: C,
    registry: SubscriptionRegistry,
}

impl<T> EventBus<T, JsonCodec> {
    /// Builder using the JSON codec.
    pub fn builder(transport: T) -> EventBusBuilder<T, JsonCodec> {
        EventBusBuilder::new(transport, JsonCodec)
    }
}

impl<T, C: Codec> EventBusBuilder<T, C> {
    pub fn new(transport: T, codec: C) -> Self {
        Self {
            transport,
            codec,
            registry: SubscriptionRegistry::new(),
        }
    }

    /// Subscribe `handler` to events of type `P`.
    ///
    /// Fails if a handler is already subscribed to `P::EVENT_TYPE`.
    pub fn subscribe<P, H>(mut self, handler: H) -> Result<Self, SubscribeError>
    where
        P: EventPayload,
        H: IntegrationEventHandler<P>,
    {
        self.registry.register::<P, H, C>(handler, self.codec.clone())?;
        debug!(event_type = P::EVENT_TYPE, "handler subscribed");
        Ok(self)
    }

    pub fn build(self) -> EventBus<T, C> {
        EventBus {
            transport: self.transport,
            codec: self.codec,
            registry: self.registry,
        }
    }
}

impl<T, C: Codec> EventBus<T, C> {
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Encode an event into the message that goes on the wire.
    pub fn encode<P: EventPayload>(
        &self,
        event: &IntegrationEvent<P>,
    ) -> Result<Message, CodecError> {
        let payload = self.codec.encode(event.payload())?;
        Ok(Message::new(
            event.id(),
            P::EVENT_TYPE,
            event.creation_date(),
            payload,
        ))
    }
}

impl<T: Publisher, C: Codec> EventBus<T, C> {
    /// Encode and publish, resolving once the transport accepted the message.
    pub async fn publish<P: EventPayload>(
        &self,
        event: &IntegrationEvent<P>,
    ) -> Result<(), TransportError> {
        let message = self.encode(event)?;
        self.publish_message(message).await
    }

    /// Publish an already encoded message.
    pub async fn publish_message(&self, message: Message) -> Result<(), TransportError> {
        let event_id = message.id;
        let event_type = message.event_type.clone();
        match self.transport.publish(message).await {
            Ok(()) => {
                info!(%event_id, %event_type, "integration event published");
                Ok(())
            }
            Err(err) => {
                warn!(%event_id, %event_type, error = %err, "integration event publish failed");
                Err(err)
            }
        }
    }
}

impl<T: Subscriber, C: Codec> EventBus<T, C> {
    /// Route one delivery to its handler, then ack or nack it.
    ///
    /// Errors only if the ack/nack itself fails; handler and decode failures
    /// are reported through the outcome.
    ///
    /// A panicking handler is caught and treated like one that failed.
    pub async fn dispatch(&self, delivery: Delivery) -> Result<DispatchOutcome, TransportError> {
        let event_id = delivery.message.id;
        let event_type = delivery.message.event_type.clone();
        let attempt = delivery.attempt;

        let Some(handling) = self.registry.route(delivery.message.clone()) else {
            warn!(%event_id, %event_type, "no handler subscribed, discarding message");
            self.transport.ack(&delivery).await?;
            return Ok(DispatchOutcome::UnknownEventType);
        };

        let handled = match AssertUnwindSafe(handling).catch_unwind().await {
            Ok(handled) => handled,
            Err(panic) => {
                let reason = format!("handler panicked: {}", panic_message(panic.as_ref()));
                error!(%event_id, %event_type, attempt, %reason, "requesting redelivery");
                self.transport.nack(&delivery, &reason).await?;
                return Ok(DispatchOutcome::HandlerFailed);
            }
        };

        match handled {
            Ok(()) => {
                self.transport.ack(&delivery).await?;
                debug!(%event_id, %event_type, attempt, "integration event handled");
                Ok(DispatchOutcome::Handled)
            }
            Err(RouteFailure::Decode(err)) => {
                error!(
                    %event_id,
                    %event_type,
                    error = %err,
                    "malformed payload, discarding message"
                );
                self.transport.ack(&delivery).await?;
                Ok(DispatchOutcome::Malformed)
            }
            Err(RouteFailure::Handler(err)) => {
                warn!(
                    %event_id,
                    %event_type,
                    attempt,
                    error = %err,
                    "handler failed, requesting redelivery"
                );
                self.transport.nack(&delivery, &err.to_string()).await?;
                Ok(DispatchOutcome::HandlerFailed)
            }
        }
    }

    /// Poll once and dispatch what arrives. `None` if the poll timed out.
    pub async fn dispatch_next(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<DispatchOutcome>, TransportError> {
        match self.transport.poll(timeout).await? {
            Some(delivery) => self.dispatch(delivery).await.map(Some),
            None => Ok(None),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
