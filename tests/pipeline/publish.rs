//! Publishing after commit and the resulting entry states.

use std::time::Duration;

use integration_outbox::{
    EventLogStore, EventState, InMemoryQueue, PublishOutcome, TransportError,
};

use crate::support::{fast_config, ordering, ordering_with, place_order, Order, ORDERS};

#[tokio::test]
async fn successful_publish_marks_published() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let event = place_order(&side.service, "o1", "u1").await.unwrap();

    let outcome = side.service.publish_through_event_bus(&event).await;

    assert_eq!(outcome, PublishOutcome::Published);
    let entry = side.log.get(event.id()).await.unwrap().unwrap();
    assert_eq!(entry.state, EventState::Published);
    assert_eq!(entry.times_sent, 1);

    let sent = queue.published();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, event.id());
    assert_eq!(sent[0].event_type, "OrderStartedIntegrationEvent");
}

#[tokio::test]
async fn transport_failure_marks_failed_and_keeps_business_state() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    queue.fail_next_publish(TransportError::ConnectionFailed("broker unreachable".into()));

    let outcome = side.service.publish_through_event_bus(&event).await;

    assert!(outcome.is_failed());
    let entry = side.log.get(event.id()).await.unwrap().unwrap();
    assert_eq!(entry.state, EventState::Failed);
    assert_eq!(entry.times_sent, 1);
    assert!(entry.last_error.unwrap().contains("broker unreachable"));
    assert!(side.db.get::<Order>(ORDERS, "o1").unwrap().is_some());
    assert!(queue.published().is_empty());
}

#[tokio::test]
async fn publish_timeout_marks_failed() {
    let queue = InMemoryQueue::new();
    let side = ordering_with(
        &queue,
        fast_config().with_publish_timeout(Duration::from_millis(20)),
    );
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    queue.set_publish_delay(Some(Duration::from_millis(300)));

    let outcome = side.service.publish_through_event_bus(&event).await;

    assert!(outcome.is_failed());
    assert_eq!(
        side.log.get(event.id()).await.unwrap().unwrap().state,
        EventState::Failed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_send_once() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let event = place_order(&side.service, "o1", "u1").await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = side.service.clone();
        let event = event.clone();
        tasks.push(tokio::spawn(async move {
            service.publish_through_event_bus(&event).await
        }));
    }
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| o.is_published()).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.is_skipped()).count(), 9);
    assert_eq!(queue.published().len(), 1);
    let entry = side.log.get(event.id()).await.unwrap().unwrap();
    assert_eq!(entry.state, EventState::Published);
    assert_eq!(entry.times_sent, 1);
}

#[tokio::test]
async fn publish_before_commit_is_skipped() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let never_saved = integration_outbox::IntegrationEvent::new(crate::support::OrderStarted {
        order_id: "o9".into(),
        user_id: "u9".into(),
    });

    let outcome = side.service.publish_through_event_bus(&never_saved).await;

    assert_eq!(outcome, PublishOutcome::Skipped { state: None });
    assert!(queue.published().is_empty());
}

#[tokio::test]
async fn pending_events_of_a_transaction_are_published() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    let transaction_id = side.log.get(event.id()).await.unwrap().unwrap().transaction_id;

    let outcomes = side
        .service
        .publish_pending_for_transaction(transaction_id)
        .await
        .unwrap();

    assert_eq!(outcomes, vec![(event.id(), PublishOutcome::Published)]);
    assert_eq!(
        side.service.publish_through_event_bus(&event).await,
        PublishOutcome::Skipped {
            state: Some(EventState::Published)
        }
    );
}
