//! Sending side of a transport.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::Message;
use crate::codec::CodecError;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The broker refused the message or the acknowledgement
    #[error("rejected by transport: {0}")]
    Rejected(String),
    /// No acknowledgement within the allotted time
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    /// The event could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("transport error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

/// Sends messages to a broker.
///
/// `publish` resolves once the broker has accepted the message, not once a
/// consumer has processed it.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), TransportError>;
}
