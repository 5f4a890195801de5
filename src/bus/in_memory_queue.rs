//! In-memory broker for tests and single-process deployments.
//!
//! Implements both [`Publisher`] and [`Subscriber`] with broker-like
//! semantics: a delivery stays in flight until it is acked, a nack puts it
//! back at the end of the queue, and a message nacked too often is moved to
//! the dead letters.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Delivery, Message, Publisher, Subscriber, TransportError};

const DEFAULT_MAX_DELIVERIES: u32 = 10;

#[derive(Default)]
struct QueueState {
    /// Every accepted message, in publish order.
    published: Vec<Message>,
    ready: VecDeque<Delivery>,
    unacked: HashMap<u64, Delivery>,
    acked: Vec<Uuid>,
    dead_letters: Vec<Message>,
    next_tag: u64,
    publish_faults: VecDeque<TransportError>,
    publish_delay: Option<Duration>,
}

impl QueueState {
    fn enqueue(&mut self, message: Message, attempt: u32) {
        self.next_tag += 1;
        self.ready.push_back(Delivery {
            tag: self.next_tag,
            attempt,
            message,
        });
    }
}

struct Inner {
    state: Mutex<QueueState>,
    available: Notify,
    max_deliveries: u32,
}

/// Shared in-memory queue. Clones are handles to the same queue.
///
/// ```ignore
/// let queue = InMemoryQueue::new();
/// queue.publish(message).await?;
///
/// let delivery = queue.poll(Duration::from_millis(10)).await?.unwrap();
/// queue.ack(&delivery).await?;
/// assert_eq!(queue.acknowledged().len(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    /// Messages delivered `max_deliveries` times without an ack are dead-lettered
    /// on their next nack.
    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                available: Notify::new(),
                max_deliveries: max_deliveries.max(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `publish` call fail with `err`. Faults queue up.
    pub fn fail_next_publish(&self, err: TransportError) {
        self.state().publish_faults.push_back(err);
    }

    /// Delay every `publish` by `delay`, simulating a slow broker.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state().publish_delay = delay;
    }

    /// Every message accepted so far, redeliveries excluded.
    pub fn published(&self) -> Vec<Message> {
        self.state().published.clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.state()
            .published
            .iter()
            .map(|m| m.event_type.clone())
            .collect()
    }

    pub fn find_all_by_type(&self, event_type: &str) -> Vec<Message> {
        self.state()
            .published
            .iter()
            .filter(|m| m.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Deliveries waiting to be polled.
    pub fn len(&self) -> usize {
        self.state().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliveries handed out but neither acked nor nacked.
    pub fn in_flight(&self) -> usize {
        self.state().unacked.len()
    }

    /// Ids of acked messages, in ack order.
    pub fn acknowledged(&self) -> Vec<Uuid> {
        self.state().acked.clone()
    }

    pub fn dead_letters(&self) -> Vec<Message> {
        self.state().dead_letters.clone()
    }
}

#[async_trait]
impl Publisher for InMemoryQueue {
    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        let delay = self.state().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state();
            if let Some(fault) = state.publish_faults.pop_front() {
                return Err(fault);
            }
            debug!(event_id = %message.id, event_type = %message.event_type, "message enqueued");
            state.published.push(message.clone());
            state.enqueue(message, 1);
        }
        self.inner.available.notify_one();
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryQueue {
    async fn poll(&self, timeout: Duration) -> Result<Option<Delivery>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.available.notified();
            {
                let mut state = self.state();
                if let Some(delivery) = state.ready.pop_front() {
                    state.unacked.insert(delivery.tag, delivery.clone());
                    return Ok(Some(delivery));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut state = self.state();
        match state.unacked.remove(&delivery.tag) {
            Some(acked) => {
                state.acked.push(acked.message.id);
                Ok(())
            }
            None => Err(TransportError::Rejected(format!(
                "unknown delivery tag {}",
                delivery.tag
            ))),
        }
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            let Some(nacked) = state.unacked.remove(&delivery.tag) else {
                return Err(TransportError::Rejected(format!(
                    "unknown delivery tag {}",
                    delivery.tag
                )));
            };

            if nacked.attempt >= self.inner.max_deliveries {
                warn!(
                    event_id = %nacked.message.id,
                    attempts = nacked.attempt,
                    reason,
                    "delivery limit reached, dead-lettering message"
                );
                state.dead_letters.push(nacked.message);
                return Ok(());
            }

            debug!(
                event_id = %nacked.message.id,
                attempt = nacked.attempt,
                reason,
                "message requeued"
            );
            state.enqueue(nacked.message, nacked.attempt + 1);
        }
        self.inner.available.notify_one();
        Ok(())
    }
}
