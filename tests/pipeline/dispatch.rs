//! Consumer-side dispatch: idempotent handlers and tolerance of bad messages.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use integration_outbox::{
    handler_fn, DispatchOutcome, EventBus, HandlerError, InMemoryQueue, IntegrationEvent, Message,
    Publisher,
};
use uuid::Uuid;

use crate::support::{
    basket_bus, eventually, ordering, place_order, Basket, BasketStore, OrderStarted,
};

const POLL: Duration = Duration::from_millis(10);

fn basket(buyer: &str) -> Basket {
    Basket {
        buyer: buyer.to_string(),
        items: vec!["mug".to_string(), "t-shirt".to_string()],
    }
}

#[tokio::test]
async fn redelivered_event_is_handled_idempotently() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let baskets = BasketStore::new();
    baskets.put(&basket("u1")).await.unwrap();
    baskets.put(&basket("u2")).await.unwrap();
    let (bus, calls) = basket_bus(&queue, &baskets);

    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    side.service.publish_through_event_bus(&event).await;
    // The broker hands the same message out a second time.
    queue.publish(queue.published()[0].clone()).await.unwrap();

    assert_eq!(bus.dispatch_next(POLL).await.unwrap(), Some(DispatchOutcome::Handled));
    assert_eq!(bus.dispatch_next(POLL).await.unwrap(), Some(DispatchOutcome::Handled));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(baskets.get("u1").unwrap().is_none());
    assert_eq!(baskets.get("u2").unwrap(), Some(basket("u2")));
}

#[tokio::test]
async fn unknown_event_types_do_not_block_the_consumer() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let baskets = BasketStore::new();
    baskets.put(&basket("u1")).await.unwrap();
    let (bus, calls) = basket_bus(&queue, &baskets);

    let stranger = Message::new(
        Uuid::new_v4(),
        "ProductPriceChangedIntegrationEvent",
        Utc::now(),
        br#"{"product_id":1}"#.to_vec(),
    );
    queue.publish(stranger.clone()).await.unwrap();
    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    side.service.publish_through_event_bus(&event).await;

    let consumer = bus.consume(POLL);
    eventually(|| calls.load(Ordering::SeqCst) == 1).await;
    let stats = consumer.stop().await;

    assert_eq!(stats.unknown, 1);
    assert_eq!(stats.handled, 1);
    assert!(baskets.get("u1").unwrap().is_none());
    assert_eq!(queue.acknowledged(), vec![stranger.id, event.id()]);
}

#[tokio::test]
async fn failing_handler_gets_the_message_again() {
    let queue = InMemoryQueue::new();
    let side = ordering(&queue);
    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = std::sync::Arc::clone(&attempts);
    let bus = EventBus::builder(queue.clone())
        .subscribe::<OrderStarted, _>(handler_fn(move |_: IntegrationEvent<OrderStarted>| {
            let seen = std::sync::Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(HandlerError::Failed("basket database offline".into()));
                }
                Ok(())
            }
        }))
        .unwrap()
        .build();
    let bus = std::sync::Arc::new(bus);

    let event = place_order(&side.service, "o1", "u1").await.unwrap();
    side.service.publish_through_event_bus(&event).await;

    let consumer = std::sync::Arc::clone(&bus).consume(POLL);
    eventually(|| queue.acknowledged() == vec![event.id()]).await;
    let stats = consumer.stop().await;

    assert_eq!(stats.failed, 2);
    assert_eq!(stats.handled, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
