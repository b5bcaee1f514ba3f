//! Integration tests for the dispatch worker.
//!
//! Drives the dispatcher against a wiremock endpoint and the in-memory
//! store, verifying the full state machine: success, scheduled retries
//! under exponential backoff, exhaustion, signing, and authentication.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use courier_core::{
    ActivityEvent, AuthConfig, Clock, Destination, DestinationId, DeliveryStatus, EventId, OrgId,
    TestClock,
};
use courier_delivery::{
    client::{ClientConfig, DeliveryClient},
    dispatcher::{Dispatcher, DispatcherConfig},
    store::{mock::MockDeliveryStore, DeliveryStore},
};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn destination(org_id: OrgId, url: String) -> Destination {
    Destination {
        id: DestinationId::new(),
        org_id,
        name: "audit-sink".into(),
        url,
        event_types: Vec::new(),
        auth: AuthConfig::None,
        signing_secret: None,
        enabled: true,
        batch_size: 100,
        timeout_ms: 5000,
        retry_max: 3,
        retry_backoff_ms: 1000,
        created_by: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn event(org_id: OrgId, created_at: chrono::DateTime<Utc>) -> ActivityEvent {
    ActivityEvent {
        id: EventId::new(),
        org_id,
        event_type: "agent.installed".into(),
        event_category: "agent".into(),
        employee_id: None,
        session_id: None,
        client_name: Some("desktop".into()),
        client_version: Some("2.4.1".into()),
        content: Some("Agent installed on wk-042".into()),
        payload: Some(serde_json::json!({ "hostname": "wk-042" })),
        created_at,
    }
}

fn dispatcher(store: Arc<MockDeliveryStore>, clock: Arc<TestClock>) -> Dispatcher {
    let client = DeliveryClient::new(ClientConfig::default()).expect("client should build");
    Dispatcher::new(
        store,
        client,
        DispatcherConfig::default(),
        clock,
        CancellationToken::new(),
    )
}

/// Seeds a destination, event, and pending record; returns the pair IDs.
async fn seed(
    store: &MockDeliveryStore,
    clock: &TestClock,
    dest: Destination,
) -> (DestinationId, EventId) {
    let evt = event(dest.org_id, clock.now_utc());
    store.add_destination(dest.clone()).await;
    store.add_event(evt.clone()).await;
    store
        .create_delivery(dest.id, evt.id, clock.now_utc())
        .await
        .unwrap()
        .expect("record should be created");
    (dest.id, evt.id)
}

#[tokio::test]
async fn successful_delivery_marks_record_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let (dest_id, event_id) =
        seed(&store, &clock, destination(OrgId::new(), format!("{}/hook", server.uri()))).await;

    let processed = dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    assert_eq!(processed, 1);
    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.response_status, Some(200));
    assert_eq!(record.response_body.as_deref(), Some("accepted"));
    assert_eq!(record.delivered_at, Some(clock.now_utc()));
    assert!(record.error_message.is_none());
    assert!(record.next_retry_at.is_none());
}

#[tokio::test]
async fn failure_schedules_retry_at_base_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let (dest_id, event_id) =
        seed(&store, &clock, destination(OrgId::new(), server.uri())).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.response_status, Some(500));
    assert_eq!(record.response_body.as_deref(), Some("boom"));
    assert_eq!(record.error_message.as_deref(), Some("HTTP 500: boom"));
    assert_eq!(
        record.next_retry_at,
        Some(clock.now_utc() + ChronoDuration::milliseconds(1000))
    );
}

#[tokio::test]
async fn rejection_error_message_embeds_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown event shape"))
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let (dest_id, event_id) =
        seed(&store, &clock, destination(OrgId::new(), server.uri())).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.error_message.as_deref(), Some("HTTP 422: unknown event shape"));
    assert_eq!(record.response_status, Some(422));
    assert_eq!(record.response_body.as_deref(), Some("unknown event shape"));
}

#[tokio::test]
async fn oversized_response_body_is_truncated_at_capture() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64 * 1024)))
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let (dest_id, event_id) =
        seed(&store, &clock, destination(OrgId::new(), server.uri())).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
    let body = record.response_body.unwrap();
    assert_eq!(body.len(), 1024);
    assert!(body.bytes().all(|b| b == b'x'));
}

#[tokio::test]
async fn records_are_not_retried_before_their_schedule() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    seed(&store, &clock, destination(OrgId::new(), server.uri())).await;

    let d = dispatcher(store.clone(), clock.clone());
    assert_eq!(d.run_once().await.unwrap(), 1);
    // Clock has not advanced; the record is scheduled in the future.
    assert_eq!(d.run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn backoff_doubles_until_budget_exhausts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let (dest_id, event_id) =
        seed(&store, &clock, destination(OrgId::new(), server.uri())).await;
    let d = dispatcher(store.clone(), clock.clone());

    // Attempt 1: retry in base.
    d.run_once().await.unwrap();
    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.attempts, 1);
    let first_retry = record.next_retry_at.unwrap();
    assert_eq!(first_retry - clock.now_utc(), ChronoDuration::milliseconds(1000));

    // Attempt 2: retry in 2x base.
    clock.advance(Duration::from_millis(1000));
    d.run_once().await.unwrap();
    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.attempts, 2);
    assert_eq!(
        record.next_retry_at.unwrap() - clock.now_utc(),
        ChronoDuration::milliseconds(2000)
    );

    // Attempt 3: budget spent, terminal.
    clock.advance(Duration::from_millis(2000));
    d.run_once().await.unwrap();
    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.status, DeliveryStatus::Exhausted);
    assert!(record.next_retry_at.is_none());

    // Terminal records are never selected again.
    clock.advance(Duration::from_secs(3600));
    assert_eq!(d.run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_succeeds_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let mut dest = destination(OrgId::new(), server.uri());
    dest.signing_secret = Some("retry-secret".into());
    let (dest_id, event_id) = seed(&store, &clock, dest).await;
    let d = dispatcher(store.clone(), clock.clone());

    d.run_once().await.unwrap();
    clock.advance(Duration::from_millis(1000));
    d.run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
    assert_eq!(record.attempts, 2);
    assert!(record.error_message.is_none());

    // Both attempts were signed over the same body.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let expected = courier_delivery::signing::sign_payload(&requests[0].body, "retry-secret");
    for request in &requests {
        let signature = request.headers.get("X-Courier-Signature").unwrap().to_str().unwrap();
        assert_eq!(signature, expected);
    }
}

#[tokio::test]
async fn transport_failure_counts_as_attempt() {
    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    // Nothing listens on port 1; the connection is refused.
    let (dest_id, event_id) =
        seed(&store, &clock, destination(OrgId::new(), "http://127.0.0.1:1".into())).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert!(record.response_status.is_none());
    assert!(record.error_message.is_some());
    assert!(record.next_retry_at.is_some());
}

#[tokio::test]
async fn signature_and_correlation_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("X-Courier-Signature"))
        .and(header("X-Courier-Event-Type", "agent.installed"))
        .and(header_exists("X-Courier-Delivery-Id"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let mut dest = destination(OrgId::new(), server.uri());
    dest.signing_secret = Some("topsecret".into());
    let (dest_id, event_id) = seed(&store, &clock, dest).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);

    let requests = server.received_requests().await.unwrap();
    let signature = requests[0].headers.get("X-Courier-Signature").unwrap().to_str().unwrap();
    let expected = courier_delivery::signing::sign_payload(&requests[0].body, "topsecret");
    assert_eq!(signature, expected);
}

#[tokio::test]
async fn unsigned_destination_sends_no_signature_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    seed(&store, &clock, destination(OrgId::new(), server.uri())).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].headers.contains_key("X-Courier-Signature"));
    assert!(!requests[0].headers.contains_key("Authorization"));
}

#[tokio::test]
async fn bearer_auth_is_attached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let mut dest = destination(OrgId::new(), server.uri());
    dest.auth = AuthConfig::Bearer { token: "tok-123".into() };
    let (dest_id, event_id) = seed(&store, &clock, dest).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn custom_header_auth_is_attached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-Api-Key", "k-42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let mut dest = destination(OrgId::new(), server.uri());
    dest.auth = AuthConfig::Header { name: "X-Api-Key".into(), value: "k-42".into() };
    let (dest_id, event_id) = seed(&store, &clock, dest).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn envelope_carries_event_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let (_, event_id) = seed(&store, &clock, destination(OrgId::new(), server.uri())).await;

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["id"], serde_json::json!(event_id.0));
    assert_eq!(body["event_type"], "agent.installed");
    assert_eq!(body["event_category"], "agent");
    assert_eq!(body["client_name"], "desktop");
    assert_eq!(body["payload"]["hostname"], "wk-042");
    assert!(body.get("employee_id").is_none());
}

#[tokio::test]
async fn missing_destination_burns_attempts_under_fallback_policy() {
    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let org = OrgId::new();
    let dest_id = DestinationId::new();

    // Event and record exist, but the destination was deleted.
    let evt = event(org, clock.now_utc());
    store.add_event(evt.clone()).await;
    store.create_delivery(dest_id, evt.id, clock.now_utc()).await.unwrap();

    let d = dispatcher(store.clone(), clock.clone());
    d.run_once().await.unwrap();

    let record = store.delivery_for(dest_id, evt.id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.error_message.as_deref(), Some("destination missing or disabled"));

    // The fallback budget eventually exhausts the record too.
    for _ in 0..2 {
        clock.advance(Duration::from_secs(3600));
        d.run_once().await.unwrap();
    }
    let record = store.delivery_for(dest_id, evt.id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Exhausted);
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn missing_event_exhausts_record_immediately() {
    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    let dest_id = DestinationId::new();
    let event_id = EventId::new();

    store.create_delivery(dest_id, event_id, clock.now_utc()).await.unwrap();

    dispatcher(store.clone(), clock.clone()).run_once().await.unwrap();

    let record = store.delivery_for(dest_id, event_id).await.unwrap();
    assert_eq!(record.status, DeliveryStatus::Exhausted);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.error_message.as_deref(), Some("event no longer exists"));
}

#[tokio::test]
async fn store_selection_failure_leaves_records_untouched() {
    let store = Arc::new(MockDeliveryStore::new());
    let clock = Arc::new(TestClock::new());
    seed(&store, &clock, destination(OrgId::new(), "http://127.0.0.1:1".into())).await;
    store.inject_select_error("pool exhausted".into()).await;

    let d = dispatcher(store.clone(), clock.clone());
    assert!(d.run_once().await.is_err());

    // No attempt was spent.
    let records = store.all_deliveries().await;
    assert_eq!(records[0].attempts, 0);
    assert_eq!(records[0].status, DeliveryStatus::Pending);
}
