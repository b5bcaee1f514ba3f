//! Contract tests for the in-memory delivery store.
//!
//! The mock must mirror the observable semantics of the Postgres
//! repositories exactly, otherwise worker tests prove nothing. These
//! tests pin the contract both implementations share.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::{Duration as ChronoDuration, Utc};
use courier_core::{DeliveryStatus, DestinationId, EventId, OrgId};
use courier_delivery::store::{mock::MockDeliveryStore, DeliveryStore};

#[tokio::test]
async fn create_delivery_is_idempotent_per_pair() {
    let store = MockDeliveryStore::new();
    let dest = DestinationId::new();
    let evt = EventId::new();
    let now = Utc::now();

    let first = store.create_delivery(dest, evt, now).await.unwrap();
    let second = store.create_delivery(dest, evt, now).await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(store.all_deliveries().await.len(), 1);
}

#[tokio::test]
async fn same_event_gets_one_record_per_destination() {
    let store = MockDeliveryStore::new();
    let evt = EventId::new();
    let now = Utc::now();

    assert!(store.create_delivery(DestinationId::new(), evt, now).await.unwrap().is_some());
    assert!(store.create_delivery(DestinationId::new(), evt, now).await.unwrap().is_some());
    assert_eq!(store.all_deliveries().await.len(), 2);
}

#[tokio::test]
async fn select_due_skips_future_and_terminal_records() {
    let store = MockDeliveryStore::new();
    let now = Utc::now();

    let fresh = store
        .create_delivery(DestinationId::new(), EventId::new(), now)
        .await
        .unwrap()
        .unwrap();
    let scheduled = store
        .create_delivery(DestinationId::new(), EventId::new(), now)
        .await
        .unwrap()
        .unwrap();
    let delivered = store
        .create_delivery(DestinationId::new(), EventId::new(), now)
        .await
        .unwrap()
        .unwrap();

    store
        .mark_failed(
            scheduled,
            Some(500),
            None,
            "HTTP 500: boom".into(),
            1,
            Some(now + ChronoDuration::minutes(5)),
            now,
        )
        .await
        .unwrap();
    store.mark_delivered(delivered, 200, None, now).await.unwrap();

    let due = store.select_due_deliveries(10, now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, fresh);

    // Once the schedule passes, the retry becomes due again.
    let later = now + ChronoDuration::minutes(6);
    let due = store.select_due_deliveries(10, later).await.unwrap();
    let ids: Vec<_> = due.iter().map(|r| r.id).collect();
    assert!(ids.contains(&fresh));
    assert!(ids.contains(&scheduled));
    assert!(!ids.contains(&delivered));
}

#[tokio::test]
async fn select_due_is_oldest_first_and_capped() {
    let store = MockDeliveryStore::new();
    let base = Utc::now();

    let mut expected = Vec::new();
    for i in (0..4).rev() {
        let id = store
            .create_delivery(
                DestinationId::new(),
                EventId::new(),
                base - ChronoDuration::minutes(i),
            )
            .await
            .unwrap()
            .unwrap();
        expected.push(id);
    }
    expected.reverse();

    let due = store.select_due_deliveries(3, base).await.unwrap();
    let ids: Vec<_> = due.iter().map(|r| r.id).collect();
    assert_eq!(ids, expected[..3].to_vec());
}

#[tokio::test]
async fn mark_delivered_is_terminal_and_increments_attempts() {
    let store = MockDeliveryStore::new();
    let dest = DestinationId::new();
    let evt = EventId::new();
    let now = Utc::now();
    let id = store.create_delivery(dest, evt, now).await.unwrap().unwrap();

    store
        .mark_failed(id, Some(500), None, "boom".into(), 1, Some(now), now)
        .await
        .unwrap();
    store.mark_delivered(id, 204, Some("ok".into()), now).await.unwrap();

    let record = store.delivery_for(dest, evt).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.response_status, Some(204));
    assert!(record.error_message.is_none());
    assert!(record.next_retry_at.is_none());
    assert_eq!(record.delivered_at, Some(now));

    // Terminal: never due again.
    let due = store.select_due_deliveries(10, now + ChronoDuration::days(1)).await.unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn mark_failed_without_schedule_exhausts() {
    let store = MockDeliveryStore::new();
    let dest = DestinationId::new();
    let evt = EventId::new();
    let now = Utc::now();
    let id = store.create_delivery(dest, evt, now).await.unwrap().unwrap();

    store
        .mark_failed(id, None, None, "connection refused".into(), 3, None, now)
        .await
        .unwrap();

    let record = store.delivery_for(dest, evt).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Exhausted);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.error_message.as_deref(), Some("connection refused"));
    assert!(record.delivered_at.is_none());

    let due = store.select_due_deliveries(10, now + ChronoDuration::days(1)).await.unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn mark_failed_writes_attempt_count_verbatim() {
    let store = MockDeliveryStore::new();
    let dest = DestinationId::new();
    let evt = EventId::new();
    let now = Utc::now();
    let id = store.create_delivery(dest, evt, now).await.unwrap().unwrap();

    store
        .mark_failed(id, Some(502), None, "bad gateway".into(), 2, Some(now), now)
        .await
        .unwrap();

    let record = store.delivery_for(dest, evt).await.unwrap();
    assert_eq!(record.attempts, 2);
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.last_attempt_at, Some(now));
}

#[tokio::test]
async fn get_destination_is_org_scoped() {
    let store = MockDeliveryStore::new();
    let org = OrgId::new();
    let dest = courier_core::Destination {
        id: DestinationId::new(),
        org_id: org,
        name: "sink".into(),
        url: "https://hooks.example.com/sink".into(),
        event_types: Vec::new(),
        auth: courier_core::AuthConfig::None,
        signing_secret: None,
        enabled: true,
        batch_size: 100,
        timeout_ms: 30_000,
        retry_max: 3,
        retry_backoff_ms: 1000,
        created_by: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.add_destination(dest.clone()).await;

    assert!(store.get_destination(dest.id, org).await.unwrap().is_some());
    assert!(store.get_destination(dest.id, OrgId::new()).await.unwrap().is_none());
}
