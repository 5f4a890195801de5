//! The business row and its event log entry commit together or not at all.

use std::collections::HashSet;

use integration_outbox::{
    EventLogEntry, EventLogStore, EventState, InMemoryQueue, InMemoryTransaction,
    IntegrationEvent, StoreError,
};

use crate::support::{ordering, place_order, Order, OrderStarted, ORDERS};

fn order_id_of(entry: &EventLogEntry) -> String {
    let payload: OrderStarted = serde_json::from_slice(&entry.content).unwrap();
    payload.order_id
}

#[tokio::test]
async fn row_and_entry_commit_together() {
    let side = ordering(&InMemoryQueue::new());

    let event = place_order(&side.service, "o1", "u1").await.unwrap();

    let order: Order = side.db.get(ORDERS, "o1").unwrap().unwrap();
    assert_eq!(order.buyer, "u1");
    let entry = side.log.get(event.id()).await.unwrap().unwrap();
    assert_eq!(entry.state, EventState::NotPublished);
    assert_eq!(entry.times_sent, 0);
    assert_eq!(entry.creation_time, event.creation_date());
    assert_eq!(order_id_of(&entry), "o1");
}

#[tokio::test]
async fn failing_business_work_writes_nothing() {
    let side = ordering(&InMemoryQueue::new());
    let event = IntegrationEvent::new(OrderStarted {
        order_id: "o1".into(),
        user_id: "u1".into(),
    });

    let err = side
        .service
        .save_event_and_changes(&event, |tx: &mut InMemoryTransaction| {
            Box::pin(async move {
                tx.insert(ORDERS, "o1", &"half-written")?;
                Err::<(), _>(StoreError::Fatal("payment method rejected".into()))
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(side.db.count(ORDERS).unwrap(), 0);
    assert!(side.log.entries().unwrap().is_empty());
}

#[tokio::test]
async fn transient_commit_failures_are_retried_once_committed() {
    let side = ordering(&InMemoryQueue::new());
    side.db.fail_next_commit(StoreError::Transient("deadlock victim".into()));
    side.db.fail_next_commit(StoreError::Transient("connection reset".into()));

    let event = place_order(&side.service, "o1", "u1").await.unwrap();

    assert_eq!(side.db.commit_count(), 1);
    assert_eq!(side.db.count(ORDERS).unwrap(), 1);
    assert_eq!(side.log.entries().unwrap().len(), 1);
    assert!(side.log.get(event.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn exhausted_retries_surface_persistence_error() {
    let side = ordering(&InMemoryQueue::new());
    for _ in 0..4 {
        side.db.fail_next_commit(StoreError::Transient("deadlock victim".into()));
    }

    let err = place_order(&side.service, "o1", "u1").await.unwrap_err();

    assert_eq!(err.attempts, 4);
    assert!(err.source.is_transient());
    assert_eq!(side.db.count(ORDERS).unwrap(), 0);
    assert!(side.log.entries().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_event_id_rolls_back_business_row() {
    let side = ordering(&InMemoryQueue::new());
    let event = place_order(&side.service, "o1", "u1").await.unwrap();

    let err = side
        .service
        .save_event_and_changes(&event, |tx: &mut InMemoryTransaction| {
            Box::pin(async move {
                tx.insert(ORDERS, "o2", &"second order")?;
                Ok::<_, StoreError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err.source, StoreError::UniqueViolation { .. }));
    assert!(side.db.get::<String>(ORDERS, "o2").unwrap().is_none());
    assert_eq!(side.log.entries().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_are_all_or_nothing() {
    let side = ordering(&InMemoryQueue::new());
    for _ in 0..5 {
        side.db.fail_next_commit(StoreError::Fatal("disk full".into()));
    }

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = side.service.clone();
        tasks.push(tokio::spawn(async move {
            place_order(&service, &format!("o{i}"), &format!("u{i}")).await
        }));
    }
    let mut committed = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            committed += 1;
        }
    }

    assert_eq!(committed, 15);
    let orders: HashSet<String> = side
        .db
        .scan::<Order>(ORDERS)
        .unwrap()
        .into_iter()
        .map(|order| order.id)
        .collect();
    let logged: HashSet<String> = side
        .log
        .entries()
        .unwrap()
        .iter()
        .map(order_id_of)
        .collect();
    assert_eq!(orders.len(), 15);
    assert_eq!(orders, logged);
}
