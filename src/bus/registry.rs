//! Type tag → handler routing table.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use super::{HandlerError, IntegrationEventHandler, Message};
use crate::codec::{Codec, CodecError};
use crate::event::{EventPayload, IntegrationEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("a handler is already subscribed to {0}")]
    DuplicateSubscription(String),
}

/// Why a registered route did not handle a message.
#[derive(Debug)]
pub(crate) enum RouteFailure {
    Decode(CodecError),
    Handler(HandlerError),
}

type Route = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), RouteFailure>> + Send + Sync>;

/// Handlers keyed by event type tag, each wrapped with the decode step for
/// its payload type.
#[derive(Default, Clone)]
pub struct SubscriptionRegistry {
    routes: HashMap<String, Route>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `P::EVENT_TYPE` to `handler`, decoding payloads with `codec`.
    pub fn register<P, H, C>(&mut self, handler: H, codec: C) -> Result<(), SubscribeError>
    where
        P: EventPayload,
        H: IntegrationEventHandler<P>,
        C: Codec,
    {
        if self.routes.contains_key(P::EVENT_TYPE) {
            return Err(SubscribeError::DuplicateSubscription(P::EVENT_TYPE.to_string()));
        }

        let handler = Arc::new(handler);
        let route: Route = Arc::new(
            move |message: Message| -> BoxFuture<'static, Result<(), RouteFailure>> {
                let handler = Arc::clone(&handler);
                let codec = codec.clone();
                Box::pin(async move {
                    let payload: P = codec
                        .decode(&message.payload)
                        .map_err(RouteFailure::Decode)?;
                    let event = IntegrationEvent::with_id(message.id, message.created_at, payload);
                    handler.handle(event).await.map_err(RouteFailure::Handler)
                })
            },
        );
        self.routes.insert(P::EVENT_TYPE.to_string(), route);
        Ok(())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Registered type tags, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `None` if no handler is registered for the message's type.
    pub(crate) fn route(
        &self,
        message: Message,
    ) -> Option<BoxFuture<'static, Result<(), RouteFailure>>> {
        let route = self.routes.get(&message.event_type)?;
        Some(route(message))
    }
}
