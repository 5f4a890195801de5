use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed body that can travel as an integration event.
///
/// `EVENT_TYPE` is the tag the bus routes on and the event log records; it
/// must be stable across service versions.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderStarted { user_id: String }
///
/// impl EventPayload for OrderStarted {
///     const EVENT_TYPE: &'static str = "OrderStartedIntegrationEvent";
/// }
/// ```
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: &'static str;
}

/// Immutable integration event envelope.
///
/// Two envelopes with the same `id` are the same logical event, which is what
/// lets consumers re-process a redelivered message idempotently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent<P> {
    id: Uuid,
    creation_date: DateTime<Utc>,
    payload: P,
}

impl<P> IntegrationEvent<P> {
    /// Create a new event with a fresh id and the current UTC time.
    pub fn new(payload: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            creation_date: Utc::now(),
            payload,
        }
    }

    /// Rebuild an envelope that already has an identity (e.g. from the wire).
    pub fn with_id(id: Uuid, creation_date: DateTime<Utc>, payload: P) -> Self {
        Self {
            id,
            creation_date,
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P: EventPayload> IntegrationEvent<P> {
    pub fn event_type(&self) -> &'static str {
        P::EVENT_TYPE
    }
}
