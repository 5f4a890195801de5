use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An encoded integration event as it travels through the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Id of the integration event
    pub id: Uuid,
    /// Type tag used for routing (e.g. "OrderStartedIntegrationEvent")
    pub event_type: String,
    /// Creation time of the integration event
    pub created_at: DateTime<Utc>,
    /// Codec-encoded payload
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(
        id: Uuid,
        event_type: impl Into<String>,
        created_at: DateTime<Utc>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            created_at,
            payload,
        }
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A message handed to a consumer, awaiting ack or nack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned tag identifying this particular delivery.
    pub tag: u64,
    /// 1 for the first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub message: Message,
}
