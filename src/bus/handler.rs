//! Consumer-side handlers for integration events.

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{PersistenceError, StoreError};
use crate::event::{EventPayload, IntegrationEvent};

/// Error returned by a handler. Any error nacks the delivery so the
/// transport redelivers it.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("handler error: {0}")]
    Other(#[from] Box<dyn Error + Send + Sync>),
}

/// Reacts to one integration event type.
///
/// A message can be delivered more than once, so `handle` must be idempotent:
/// handling the same event id twice has the same effect as handling it once.
#[async_trait]
pub trait IntegrationEventHandler<P: EventPayload>: Send + Sync + 'static {
    async fn handle(&self, event: IntegrationEvent<P>) -> Result<(), HandlerError>;
}

/// Handler backed by an async closure. Built with [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// let bus = EventBus::builder(queue)
///     .subscribe::<OrderStarted, _>(handler_fn(|event: IntegrationEvent<OrderStarted>| {
///         let baskets = baskets.clone();
///         async move {
///             baskets.delete(&event.payload().user_id)?;
///             Ok(())
///         }
///     }))?
///     .build();
/// ```
pub fn handler_fn<P, F, Fut>(f: F) -> FnHandler<F>
where
    P: EventPayload,
    F: Fn(IntegrationEvent<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<P, F, Fut> IntegrationEventHandler<P> for FnHandler<F>
where
    P: EventPayload,
    F: Fn(IntegrationEvent<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: IntegrationEvent<P>) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}
