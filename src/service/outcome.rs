use crate::log::EventState;

/// Result of one publication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The transport accepted the message.
    Published,
    /// The attempt failed or timed out. The entry is left Failed for the sweeper.
    Failed { reason: String },
    /// Nothing was sent: the entry is missing, or another attempt owns it.
    Skipped { state: Option<EventState> },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PublishOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PublishOutcome::Skipped { .. })
    }
}
