use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::Message;
use crate::error::StoreError;

/// Delivery state of a logged event.
///
/// ```text
/// NotPublished ──► InProgress ──► Published
///      ▲               │  ▲
///      │               ▼  │
///      └────────────  Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventState {
    NotPublished,
    InProgress,
    Published,
    Failed,
}

impl EventState {
    /// Whether `self -> next` is a legal step of the delivery state machine.
    pub fn can_transition_to(self, next: EventState) -> bool {
        use EventState::*;
        matches!(
            (self, next),
            (NotPublished, InProgress)
                | (InProgress, Published)
                | (InProgress, Failed)
                | (Failed, InProgress)
                | (Failed, NotPublished)
        )
    }
}

/// One outgoing event and its delivery bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_id: Uuid,
    pub event_type_name: String,
    /// Codec-encoded payload, exactly as it will be handed to the transport.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub state: EventState,
    /// Attempts that reached InProgress.
    pub times_sent: u32,
    /// Creation time of the event itself.
    pub creation_time: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Transaction that wrote this entry together with the business change.
    pub transaction_id: Uuid,
}

impl EventLogEntry {
    pub fn new(message: &Message, transaction_id: Uuid) -> Self {
        Self {
            event_id: message.id,
            event_type_name: message.event_type.clone(),
            content: message.payload.clone(),
            state: EventState::NotPublished,
            times_sent: 0,
            creation_time: message.created_at,
            state_changed_at: Utc::now(),
            last_error: None,
            transaction_id,
        }
    }

    /// Rebuild the bus message this entry was created from.
    pub fn to_message(&self) -> Message {
        Message::new(
            self.event_id,
            self.event_type_name.clone(),
            self.creation_time,
            self.content.clone(),
        )
    }

    /// Apply a state change in place, enforcing the state machine.
    ///
    /// Returns `false` without touching the entry if the current state is not
    /// `from`; errors if `from -> to` is not a legal transition.
    pub(crate) fn transition(
        &mut self,
        from: EventState,
        to: EventState,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                event_id: self.event_id,
                from,
                to,
            });
        }
        if self.state != from {
            return Ok(false);
        }
        self.state = to;
        self.state_changed_at = Utc::now();
        match to {
            EventState::InProgress => self.times_sent = self.times_sent.saturating_add(1),
            EventState::Published | EventState::NotPublished => self.last_error = None,
            _ => {}
        }
        Ok(true)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
