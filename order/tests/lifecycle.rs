//! Order service scenarios over the in-memory bus and stores.

#![allow(clippy::unwrap_used)]

use chrono::Utc;
use dishpatch_core::bus::BusClient;
use dishpatch_core::domain::{Order, OrderStatus};
use dishpatch_core::envelope::{event_types, Envelope};
use dishpatch_core::scheduler::{memory::InMemoryTimerStore, Scheduler, TimerStore};
use dishpatch_order::store::memory::InMemoryOrderStore;
use dishpatch_order::{OrderService, OrderStore, VALIDATION_DELAY_MS};
use dishpatch_testing::InMemoryBus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "orders";

struct Fixture {
    bus: InMemoryBus,
    store: Arc<InMemoryOrderStore>,
    timers: Arc<InMemoryTimerStore>,
    service: OrderService,
}

fn fixture() -> Fixture {
    let bus = InMemoryBus::new();
    let store = Arc::new(InMemoryOrderStore::new());
    let timers = Arc::new(InMemoryTimerStore::new());
    let service = OrderService::new(
        Arc::new(bus.clone()),
        store.clone(),
        timers.clone(),
        TOPIC,
    );
    Fixture {
        bus,
        store,
        timers,
        service,
    }
}

async fn drain(fixture: &Fixture) {
    let mut consumer = fixture.bus.subscribe(&[TOPIC]).await.unwrap();
    fixture.service.run(consumer.as_mut()).await;
}

fn order_requested(order_id: &str, request_id: &str) -> Envelope {
    Envelope::new(
        event_types::ORDER_REQUESTED,
        json!({
            "orderId": order_id,
            "userId": "u1",
            "kitchenId": "k1",
            "requestId": request_id,
            "dish": "pizza",
            "totalPrice": 10.0,
        }),
        None,
    )
}

fn status_event(event_type: &str, order_id: &str) -> Envelope {
    Envelope::new(event_type, json!({"orderId": order_id}), None)
}

fn responses(bus: &InMemoryBus) -> Vec<(String, serde_json::Value)> {
    bus.published(TOPIC)
        .into_iter()
        .filter(|e| e.event_type == event_types::UPDATE_HTTP_RESPONSE)
        .map(|e| {
            let request_id = e.payload["requestId"].as_str().unwrap().to_string();
            let message: serde_json::Value =
                serde_json::from_str(e.payload["message"].as_str().unwrap()).unwrap();
            (request_id, message)
        })
        .collect()
}

#[tokio::test]
async fn order_requested_persists_acks_and_emits_created() {
    let fixture = fixture();
    fixture
        .bus
        .publish(TOPIC, Some("o1"), &order_requested("o1", "r1"))
        .await
        .unwrap();

    drain(&fixture).await;

    let order = fixture.store.snapshot("o1").unwrap();
    assert_eq!(order.status, OrderStatus::OrderCreated);
    assert_eq!(order.status_history.len(), 1);
    assert_eq!(order.dish.as_deref(), Some("pizza"));
    assert_eq!(order.total_price, Some(10.0));

    let created: Vec<_> = fixture
        .bus
        .published(TOPIC)
        .into_iter()
        .filter(|e| e.event_type == event_types::ORDER_CREATED)
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].payload["orderId"], json!("o1"));

    let responses = responses(&fixture.bus);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, "r1");
    assert_eq!(responses[0].1, json!({"status": "orderCreated"}));
}

#[tokio::test]
async fn full_lifecycle_with_duplicate_and_backward_events() {
    let fixture = fixture();
    fixture
        .bus
        .publish(TOPIC, Some("o1"), &order_requested("o1", "r1"))
        .await
        .unwrap();
    let stages = [
        event_types::ORDER_VALIDATED,
        event_types::KITCHEN_PREPARING_FOOD,
        event_types::KITCHEN_FOOD_READY,
        event_types::KITCHEN_FOOD_READY, // duplicate delivery
        event_types::ORDER_VALIDATED,    // stray out-of-order replay
        event_types::COURIER_MATCHED,
        event_types::COURIER_PICKED_UP,
        event_types::DELIVERED,
    ];
    for stage in stages {
        fixture
            .bus
            .publish(TOPIC, Some("o1"), &status_event(stage, "o1"))
            .await
            .unwrap();
    }

    drain(&fixture).await;

    let order = fixture.store.snapshot("o1").unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);

    // One entry per applied transition: the duplicate and the backward
    // replay appended nothing.
    assert_eq!(order.status_history.len(), 7);
    let food_ready_entries = order
        .status_history
        .iter()
        .filter(|e| e.status == OrderStatus::KitchenFoodReady)
        .count();
    assert_eq!(food_ready_entries, 1);

    // Append-only: the recorded sequence is exactly the workflow order.
    let recorded: Vec<_> = order.status_history.iter().map(|e| e.status).collect();
    assert_eq!(recorded, OrderStatus::ALL.to_vec());
}

#[tokio::test]
async fn order_created_schedules_durable_validation() {
    let fixture = fixture();
    fixture
        .bus
        .publish(TOPIC, Some("o1"), &order_requested("o1", "r1"))
        .await
        .unwrap();

    drain(&fixture).await;

    // The consumed orderCreated left one pending emission, due after the
    // fixed validation delay.
    assert_eq!(fixture.timers.pending(), 1);
    let horizon = Utc::now() + chrono::Duration::milliseconds(i64::try_from(VALIDATION_DELAY_MS).unwrap() + 1000);
    let due = fixture.timers.due(horizon).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].envelope.event_type, event_types::ORDER_VALIDATED);
    assert_eq!(due[0].partition_key.as_deref(), Some("o1"));

    // Not due yet: nothing published before the delay elapses.
    let scheduler = Scheduler::new(
        fixture.timers.clone(),
        Arc::new(fixture.bus.clone()),
        Duration::from_millis(10),
    );
    assert_eq!(scheduler.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn consumed_order_validated_advances_the_order() {
    let fixture = fixture();
    let order = Order::create("o1", "u1", "k1", None, None, Utc::now());
    fixture.store.insert(&order).await.unwrap();

    fixture
        .bus
        .publish(
            TOPIC,
            Some("o1"),
            &status_event(event_types::ORDER_VALIDATED, "o1"),
        )
        .await
        .unwrap();
    drain(&fixture).await;

    let stored = fixture.store.snapshot("o1").unwrap();
    assert_eq!(stored.status, OrderStatus::OrderValidated);
    assert_eq!(stored.status_history.len(), 2);
}

#[tokio::test]
async fn get_order_from_id_returns_the_document() {
    let fixture = fixture();
    let order = Order::create("o1", "u1", "k1", Some("pizza".into()), Some(10.0), Utc::now());
    fixture.store.insert(&order).await.unwrap();

    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new(
                event_types::GET_ORDER_FROM_ID,
                json!({"orderId": "o1", "requestId": "q1"}),
                None,
            ),
        )
        .await
        .unwrap();
    drain(&fixture).await;

    let responses = responses(&fixture.bus);
    assert_eq!(responses.len(), 1);
    let (request_id, message) = &responses[0];
    assert_eq!(request_id, "q1");
    assert_eq!(message["status"], json!("success"));
    assert_eq!(message["doc"]["orderId"], json!("o1"));
    assert_eq!(message["doc"]["status"], json!("orderCreated"));
}

#[tokio::test]
async fn get_order_from_id_for_unknown_order_returns_null_doc() {
    let fixture = fixture();
    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new(
                event_types::GET_ORDER_FROM_ID,
                json!({"orderId": "ghost", "requestId": "q1"}),
                None,
            ),
        )
        .await
        .unwrap();
    drain(&fixture).await;

    let responses = responses(&fixture.bus);
    assert_eq!(responses[0].1, json!({"status": "success", "doc": null}));
}

#[tokio::test]
async fn get_orders_of_user_returns_exactly_that_users_orders() {
    let fixture = fixture();
    for id in ["o1", "o2", "o3"] {
        let order = Order::create(id, "u1", "k1", None, None, Utc::now());
        fixture.store.insert(&order).await.unwrap();
    }
    let other = Order::create("o4", "u2", "k1", None, None, Utc::now());
    fixture.store.insert(&other).await.unwrap();

    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new(
                event_types::GET_ORDERS_OF_USER,
                json!({"userId": "u1", "requestId": "q1"}),
                None,
            ),
        )
        .await
        .unwrap();
    drain(&fixture).await;

    let responses = responses(&fixture.bus);
    let message = &responses[0].1;
    assert_eq!(message["status"], json!("success"));
    let docs = message["docs"].as_array().unwrap();
    assert_eq!(docs.len(), 3);
    for doc in docs {
        assert_eq!(doc["userId"], json!("u1"));
        // Caller-facing shape only: no storage internals.
        assert!(doc.get("_id").is_none());
        assert!(doc.get("statusRank").is_none());
    }
}

#[tokio::test]
async fn failed_insert_reports_failure_and_still_emits_created() {
    let fixture = fixture();
    fixture.store.fail_inserts(true);
    fixture
        .bus
        .publish(TOPIC, Some("o1"), &order_requested("o1", "r1"))
        .await
        .unwrap();

    drain(&fixture).await;

    assert!(fixture.store.snapshot("o1").is_none());
    let responses = responses(&fixture.bus);
    assert_eq!(
        responses[0].1,
        json!({"status": "Order failed saving in database"})
    );
    assert!(fixture
        .bus
        .published(TOPIC)
        .iter()
        .any(|e| e.event_type == event_types::ORDER_CREATED));
}

#[tokio::test]
async fn unknown_event_type_is_ignored_but_committed() {
    let fixture = fixture();
    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new("courierLocationPing", json!({"lat": 1.0}), None),
        )
        .await
        .unwrap();

    drain(&fixture).await;

    // Keyless publications land on partition 0.
    assert_eq!(fixture.bus.committed(TOPIC, 0), Some(1));
    assert!(responses(&fixture.bus).is_empty());
}

#[tokio::test]
async fn malformed_message_does_not_stop_the_loop() {
    let fixture = fixture();
    let order = Order::create("o1", "u1", "k1", None, None, Utc::now());
    fixture.store.insert(&order).await.unwrap();

    fixture.bus.publish_raw(TOPIC, None, b"not json".to_vec());
    fixture
        .bus
        .publish(TOPIC, None, &status_event(event_types::DELIVERED, "o1"))
        .await
        .unwrap();

    drain(&fixture).await;

    // The poison message was acknowledged and the one behind it processed.
    assert_eq!(fixture.bus.committed(TOPIC, 0), Some(2));
    assert_eq!(
        fixture.store.snapshot("o1").unwrap().status,
        OrderStatus::Delivered
    );
    assert!(responses(&fixture.bus).is_empty());
}
