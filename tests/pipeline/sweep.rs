//! Recovery of events that failed, were abandoned mid-publish, or were never
//! handed to the bus.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use integration_outbox::{
    EventLogStore, EventState, InMemoryQueue, PublishOutcome, RetrySweeper, SweepConfig,
    TransportError,
};

use crate::support::{
    basket_bus, eventually, fast_config, ordering, ordering_with, place_order, Basket, BasketStore,
};

fn eager() -> SweepConfig {
    SweepConfig::default()
        .with_interval(Duration::from_millis(10))
        .with_retry_after(Duration::ZERO)
        .with_max_retry_after(Duration::ZERO)
        .with_in_progress_timeout(Duration::ZERO)
}

#[tokio::test]
async fn transport_failure_is_recovered_by_the_sweep() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let baskets = BasketStore::new();
    baskets
        .put(&Basket {
            buyer: "u1".into(),
            items: vec!["mug".into()],
        })
        .await
        .unwrap();
    let (bus, calls) = basket_bus(&queue, &baskets);
    let consumer = bus.consume(Duration::from_millis(10));

    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    queue.fail_next_publish(TransportError::ConnectionFailed("broker restarting".into()));
    assert!(side.service.publish_through_event_bus(&event).await.is_failed());
    assert!(baskets.get("u1").unwrap().is_some());

    let sweeper = RetrySweeper::new(Arc::clone(&side.service), eager());
    let result = sweeper.sweep_once().await;
    assert_eq!(result.republished, 1);

    eventually(|| calls.load(Ordering::SeqCst) == 1).await;
    consumer.stop().await;

    let entry = side.log.get(event.id()).await.unwrap().unwrap();
    assert_eq!(entry.state, EventState::Published);
    assert_eq!(entry.times_sent, 2);
    assert!(baskets.get("u1").unwrap().is_none());
}

#[tokio::test]
async fn abandoned_attempt_is_reconciled_and_resent() {
    let queue = InMemoryQueue::new();
    let side = ordering_with(
        &queue,
        fast_config().with_publish_timeout(Duration::from_millis(20)),
    );
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    // A producer took the guard and died before publishing.
    side.log
        .update_state(event.id(), EventState::NotPublished, EventState::InProgress)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let result = RetrySweeper::new(Arc::clone(&side.service), eager())
        .sweep_once()
        .await;

    assert_eq!(result.reconciled, 1);
    assert_eq!(result.republished, 1);
    assert_eq!(queue.published().len(), 1);
    assert_eq!(
        side.log.get(event.id()).await.unwrap().unwrap().state,
        EventState::Published
    );
}

#[tokio::test]
async fn sweep_leaves_a_slow_publish_in_flight_alone() {
    let queue = InMemoryQueue::new();
    let side = ordering_with(&queue, fast_config().with_publish_timeout(Duration::from_secs(1)));
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    queue.set_publish_delay(Some(Duration::from_millis(200)));

    let sweeper = RetrySweeper::new(
        Arc::clone(&side.service),
        eager().with_in_progress_timeout(Duration::from_millis(50)),
    );
    let (outcome, result) = tokio::join!(side.service.publish_through_event_bus(&event), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.sweep_once().await
    });

    assert_eq!(outcome, PublishOutcome::Published);
    assert_eq!(result.reconciled, 0);
    assert_eq!(result.republished, 0);
    assert_eq!(queue.published().len(), 1);
    assert_eq!(
        side.log.get(event.id()).await.unwrap().unwrap().state,
        EventState::Published
    );
}

#[tokio::test]
async fn committed_but_unpublished_event_is_recovered() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let event = place_order(&side.service, "o1", "u1").await.unwrap();

    let result = RetrySweeper::new(Arc::clone(&side.service), eager())
        .sweep_once()
        .await;

    assert_eq!(result.recovered, 1);
    assert_eq!(queue.published()[0].id, event.id());
    assert_eq!(
        side.service.publish_through_event_bus(&event).await,
        PublishOutcome::Skipped {
            state: Some(EventState::Published)
        }
    );
}

#[tokio::test]
async fn competing_sweepers_send_each_event_once() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    for i in 0..5 {
        let event = place_order(&side.service, &format!("o{i}"), "u1").await.unwrap();
        queue.fail_next_publish(TransportError::Rejected("queue full".into()));
        side.service.publish_through_event_bus(&event).await;
    }

    let config = eager().with_in_progress_timeout(Duration::from_secs(60));
    let first = RetrySweeper::new(Arc::clone(&side.service), config.clone());
    let second = RetrySweeper::new(Arc::clone(&side.service), config);
    let (a, b) = tokio::join!(first.sweep_once(), second.sweep_once());

    assert_eq!(a.republished + b.republished, 5);
    assert_eq!(queue.published().len(), 5);
    assert_eq!(side.log.count_in_state(EventState::Published).unwrap(), 5);
}

#[tokio::test]
async fn background_sweeper_reports_totals() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    queue.fail_next_publish(TransportError::Timeout(Duration::from_secs(5)));
    side.service.publish_through_event_bus(&event).await;

    let handle = Arc::new(RetrySweeper::new(Arc::clone(&side.service), eager())).spawn();
    eventually(|| queue.published().len() == 1).await;
    let stats = handle.stop().await;

    assert_eq!(stats.republished, 1);
    assert_eq!(stats.exhausted, 0);
    assert!(stats.passes >= 1);
}
