//! Relay scenarios over the in-memory bus and correlation store.

#![allow(clippy::unwrap_used)]

use dishpatch_core::bus::BusClient;
use dishpatch_core::envelope::{event_types, Envelope};
use dishpatch_relay::RelayService;
use dishpatch_testing::{InMemoryBus, InMemoryCorrelationStore};
use serde_json::json;
use std::sync::Arc;

const TOPIC: &str = "orders";

struct Fixture {
    bus: InMemoryBus,
    store: InMemoryCorrelationStore,
    service: RelayService,
}

fn fixture() -> Fixture {
    let bus = InMemoryBus::new();
    let store = InMemoryCorrelationStore::new();
    let service = RelayService::new(Arc::new(store.clone()));
    Fixture {
        bus,
        store,
        service,
    }
}

async fn drain(fixture: &Fixture) {
    let mut consumer = fixture.bus.subscribe(&[TOPIC]).await.unwrap();
    fixture.service.run(consumer.as_mut()).await;
}

#[tokio::test]
async fn response_update_is_parked_under_its_request_id() {
    let fixture = fixture();
    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new(
                event_types::UPDATE_HTTP_RESPONSE,
                json!({"requestId": "r1", "message": r#"{"status":"orderCreated"}"#}),
                None,
            ),
        )
        .await
        .unwrap();

    drain(&fixture).await;

    assert_eq!(
        fixture.store.get("r1").as_deref(),
        Some(r#"{"status":"orderCreated"}"#)
    );
    assert_eq!(fixture.bus.committed(TOPIC, 0), Some(1));
}

#[tokio::test]
async fn later_response_for_the_same_request_overwrites() {
    let fixture = fixture();
    for message in [r#"{"status":"orderCreated"}"#, r#"{"status":"success"}"#] {
        fixture
            .bus
            .publish(
                TOPIC,
                None,
                &Envelope::new(
                    event_types::UPDATE_HTTP_RESPONSE,
                    json!({"requestId": "r1", "message": message}),
                    None,
                ),
            )
            .await
            .unwrap();
    }

    drain(&fixture).await;

    assert_eq!(
        fixture.store.get("r1").as_deref(),
        Some(r#"{"status":"success"}"#)
    );
}

#[tokio::test]
async fn other_events_are_committed_and_dropped() {
    let fixture = fixture();
    for event_type in [
        event_types::ORDER_REQUESTED,
        event_types::KITCHEN_FOOD_READY,
        event_types::DELIVERED,
    ] {
        fixture
            .bus
            .publish(
                TOPIC,
                None,
                &Envelope::new(event_type, json!({"orderId": "o1"}), None),
            )
            .await
            .unwrap();
    }

    drain(&fixture).await;

    assert!(fixture.store.is_empty());
    assert_eq!(fixture.bus.committed(TOPIC, 0), Some(3));
}

#[tokio::test]
async fn malformed_response_update_writes_nothing() {
    let fixture = fixture();
    // requestId present but message missing.
    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new(
                event_types::UPDATE_HTTP_RESPONSE,
                json!({"requestId": "r1"}),
                None,
            ),
        )
        .await
        .unwrap();

    drain(&fixture).await;

    assert!(fixture.store.is_empty());
    assert_eq!(fixture.bus.committed(TOPIC, 0), Some(1));
}

#[tokio::test]
async fn poison_message_does_not_stop_the_relay() {
    let fixture = fixture();
    fixture.bus.publish_raw(TOPIC, None, b"\xff\xfe garbage".to_vec());
    fixture
        .bus
        .publish(
            TOPIC,
            None,
            &Envelope::new(
                event_types::UPDATE_HTTP_RESPONSE,
                json!({"requestId": "r1", "message": "ok"}),
                None,
            ),
        )
        .await
        .unwrap();

    drain(&fixture).await;

    assert_eq!(fixture.store.get("r1").as_deref(), Some("ok"));
    assert_eq!(fixture.bus.committed(TOPIC, 0), Some(2));
}
