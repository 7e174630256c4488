#![allow(clippy::unwrap_used, clippy::expect_used)]
// End-to-end tests for `SyncSession` against a wiremock platform.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil_core::stream::Snapshot;
use vigil_core::{
    ArmMode, ArmedState, AuthCredentials, BackoffPolicy, EntityKind, EntityRef, Event,
    EventCategory, EventId, FailureKind, Origin, PollerConfig, Scope, SupervisorState, SyncConfig,
    SyncSession, Zone,
};

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ─────────────────────────────────────────────────────────

fn config(server: &MockServer, location: &str) -> SyncConfig {
    let mut config = SyncConfig::new(
        Url::parse(&server.uri()).unwrap(),
        AuthCredentials::new(SecretString::from("test-key".to_string())),
        Scope::new("org-1", location),
    );
    config.control_backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(20));
    config.stream_backoff = BackoffPolicy::new(Duration::from_millis(50), Duration::from_millis(200));
    config.poll = PollerConfig {
        min_interval: Duration::from_millis(100),
        max_interval: Duration::from_millis(400),
    };
    config
}

async fn mount_service_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/capture-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": { "isRunning": true }
        })))
        .mount(server)
        .await;
}

async fn mount_collection(server: &MockServer, location: &str, kind: &str, items: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/locations/{location}/{kind}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": items })))
        .mount(server)
        .await;
}

async fn mount_stream(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/api/v1/events/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_owned(), "text/event-stream"))
        .mount(server)
        .await;
}

async fn mount_location(server: &MockServer, location: &str, zones: Value) {
    mount_collection(server, location, "zones", zones).await;
    mount_collection(server, location, "devices", json!([])).await;
    mount_collection(server, location, "spaces", json!([])).await;
}

async fn wait_for_zones(
    session: &SyncSession,
    pred: impl Fn(&[Arc<Zone>]) -> bool,
) -> Snapshot<Zone> {
    let mut zones = session.zones();
    tokio::time::timeout(WAIT, zones.wait_for(pred))
        .await
        .expect("timed out waiting for zones")
        .expect("session dropped")
}

fn zone_is(zones: &[Arc<Zone>], id: &str, state: &ArmedState) -> bool {
    zones.iter().any(|z| z.id == id && z.armed_state == *state)
}

/// Zone collection served ahead of anything mounted earlier.
async fn mount_zones_override(server: &MockServer, location: &str, zones: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/locations/{location}/zones")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": zones })))
        .with_priority(1)
        .mount(server)
        .await;
}

fn zone_event(event_id: &str, zone_id: &str, state: &str, occurred_at: &str) -> Event {
    Event {
        id: EventId::Server(event_id.into()),
        event_type: "area_state_change".into(),
        category: EventCategory::Zone,
        entity: Some(EntityRef {
            kind: EntityKind::Zone,
            id: zone_id.into(),
            name: None,
        }),
        occurred_at: Some(occurred_at.parse().unwrap()),
        received_at: Utc::now(),
        display_state: Some(state.into()),
        payload: serde_json::Map::new(),
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn pushed_arming_outranks_older_poll() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_location(
        &server,
        "loc-1",
        json!([{
            "id": "z1",
            "name": "Front",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:00Z"
        }]),
    )
    .await;
    mount_stream(
        &server,
        concat!(
            "event: area_state_change\n",
            "data: {\"id\":\"e1\",\"entityRef\":{\"kind\":\"zone\",\"id\":\"z1\"},",
            "\"displayState\":\"ARMED_AWAY\",\"timestamp\":\"2026-01-01T00:00:05Z\"}\n\n",
        ),
    )
    .await;

    let session = SyncSession::new(config(&server, "loc-1")).unwrap();
    assert_ok!(session.start().await);

    let zones = wait_for_zones(&session, |zones| {
        zones
            .iter()
            .any(|z| z.id == "z1" && z.name == "Front" && z.armed_state == ArmedState::ArmedAway)
    })
    .await;
    assert_eq!(zones.len(), 1);
    assert_eq!(*session.supervisor_state().borrow(), SupervisorState::Running);

    session.shutdown().await;
    assert_eq!(*session.supervisor_state().borrow(), SupervisorState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_fail_start() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/capture-service"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let session = SyncSession::new(config(&server, "loc-1")).unwrap();
    let err = assert_err!(session.start().await);
    assert!(err.is_authorization());

    let failure = session.terminal_failure().borrow().clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Authorization);
    assert_eq!(*session.supervisor_state().borrow(), SupervisorState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_service_degrades_without_stopping_sync() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/capture-service"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_location(
        &server,
        "loc-1",
        json!([{ "id": "z1", "name": "Front", "armedState": "DISARMED" }]),
    )
    .await;
    mount_stream(&server, ": idle\n\n").await;

    let mut config = config(&server, "loc-1");
    config.control_max_attempts = 2;
    let session = SyncSession::new(config).unwrap();
    assert_ok!(session.start().await);

    assert_eq!(*session.supervisor_state().borrow(), SupervisorState::Failed);
    let failure = session.terminal_failure().borrow().clone().unwrap();
    assert_eq!(failure.kind, FailureKind::ServiceUnavailable);

    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;
    session.shutdown().await;
}

// ── Push and poll ordering ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn newer_poll_corrects_stale_push() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_stream(&server, ": idle\n\n").await;
    mount_location(
        &server,
        "loc-1",
        json!([{
            "id": "z1",
            "name": "Front",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:00Z"
        }]),
    )
    .await;

    let mut config = config(&server, "loc-1");
    config.cache_ttl = Duration::from_millis(50);
    let session = SyncSession::new(config).unwrap();
    session.start().await.unwrap();
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;

    let push = zone_event("e1", "z1", "ARMED_AWAY", "2026-01-01T00:00:05Z");
    assert_ok!(session.ingest(Origin::Stream, push).await);
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::ArmedAway)).await;

    // Same state the poller already saw, stamped after the push.
    mount_zones_override(
        &server,
        "loc-1",
        json!([{
            "id": "z1",
            "name": "Front",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:10Z"
        }]),
    )
    .await;
    let zones = wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;
    assert_eq!(zones.len(), 1);
    session.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn same_timestamp_poll_inside_push_window_keeps_pushed_state() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_stream(&server, ": idle\n\n").await;
    mount_location(
        &server,
        "loc-1",
        json!([{
            "id": "z1",
            "name": "Front",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:00Z"
        }]),
    )
    .await;

    let mut config = config(&server, "loc-1");
    config.cache_ttl = Duration::from_millis(50);
    let session = SyncSession::new(config).unwrap();
    session.start().await.unwrap();
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;

    let push = zone_event("e1", "z1", "ARMED_AWAY", "2026-01-01T00:00:00Z");
    assert_ok!(session.ingest(Origin::Stream, push).await);
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::ArmedAway)).await;

    // Renamed so the poll is delivered; its state ties the push on time.
    mount_zones_override(
        &server,
        "loc-1",
        json!([{
            "id": "z1",
            "name": "Front door",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:00Z"
        }]),
    )
    .await;
    let zones = wait_for_zones(&session, |zones| zones.iter().any(|z| z.name == "Front door")).await;
    assert_eq!(zones[0].armed_state, ArmedState::ArmedAway);
    session.shutdown().await;
}

// ── Mutations ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn arming_invalidates_cache_before_refetch() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_stream(&server, ": idle\n\n").await;
    mount_collection(&server, "loc-1", "devices", json!([])).await;
    mount_collection(&server, "loc-1", "spaces", json!([])).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/locations/loc-1/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "z1",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:00Z"
        }])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/locations/loc-1/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "z1",
            "armedState": "ARMED_AWAY",
            "updatedAt": "2026-01-01T00:01:00Z"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/locations/loc-1/zones/z1/arm"))
        .and(body_partial_json(json!({ "mode": "away" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let session = SyncSession::new(config(&server, "loc-1")).unwrap();
    session.start().await.unwrap();
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;

    assert_ok!(session.arm_zone("z1", ArmMode::Away).await);
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::ArmedAway)).await;
    session.shutdown().await;
}

// ── Scope switching ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn switching_location_replaces_entities() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_stream(&server, ": idle\n\n").await;
    mount_location(
        &server,
        "loc-1",
        json!([{ "id": "z1", "armedState": "DISARMED" }]),
    )
    .await;
    mount_location(
        &server,
        "loc-2",
        json!([{ "id": "z2", "armedState": "ARMED_STAY" }]),
    )
    .await;

    let session = SyncSession::new(config(&server, "loc-1")).unwrap();
    session.start().await.unwrap();
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;

    assert_ok!(session.switch_scope("loc-2").await);
    assert_eq!(session.scope().location_id, "loc-2");

    let zones = wait_for_zones(&session, |zones| {
        zone_is(zones, "z2", &ArmedState::ArmedStay)
    })
    .await;
    assert!(zones.iter().all(|z| z.id != "z1"));

    // A manual refresh reads the new location only.
    let report = session.refresh(EntityKind::Zone).await.unwrap();
    assert_eq!(report.removed, 0);
    assert!(session.reconciler().zone("z1").is_none());
    session.shutdown().await;
}

// ── Deduplication ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn event_from_several_origins_is_published_once() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_stream(&server, ": idle\n\n").await;
    mount_location(
        &server,
        "loc-1",
        json!([{
            "id": "z9",
            "name": "Garage",
            "armedState": "DISARMED",
            "updatedAt": "2026-01-01T00:00:00Z"
        }]),
    )
    .await;

    let session = SyncSession::new(config(&server, "loc-1")).unwrap();
    session.start().await.unwrap();
    wait_for_zones(&session, |zones| zone_is(zones, "z9", &ArmedState::Disarmed)).await;
    let mut events = session.events();

    let event = Event {
        id: EventId::Server("evt-9".into()),
        event_type: "area_state_change".into(),
        category: EventCategory::Zone,
        entity: Some(EntityRef {
            kind: EntityKind::Zone,
            id: "z9".into(),
            name: None,
        }),
        occurred_at: Some(Utc::now()),
        received_at: Utc::now(),
        display_state: Some("ARMED_NIGHT".into()),
        payload: serde_json::Map::new(),
    };
    assert_ok!(session.ingest(Origin::ControlChannel, event.clone()).await);
    assert_ok!(session.ingest(Origin::Retry, event).await);

    let first = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(first.id, EventId::Server("evt-9".into()));
    let second = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    assert!(second.is_err(), "duplicate was published");

    let zone = session.reconciler().zone("z9").unwrap();
    assert_eq!(zone.armed_state, ArmedState::ArmedNight);
    assert_eq!(zone.name, "Garage");
    session.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn control_call_carries_scope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/capture-service"))
        .and(body_partial_json(json!({
            "action": "start",
            "organizationId": "org-1",
            "locationId": "loc-3"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    mount_stream(&server, ": idle\n\n").await;
    mount_location(&server, "loc-3", json!([])).await;

    let session = SyncSession::new(config(&server, "loc-3")).unwrap();
    session.start().await.unwrap();
    assert!(session.service_status().borrow().is_running);
    session.shutdown().await;
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn dropping_last_handle_stops_background_tasks() {
    let server = MockServer::start().await;
    mount_service_ok(&server).await;
    mount_stream(&server, ": idle\n\n").await;
    mount_location(
        &server,
        "loc-1",
        json!([{ "id": "z1", "name": "Front", "armedState": "DISARMED" }]),
    )
    .await;

    let session = SyncSession::new(config(&server, "loc-1")).unwrap();
    session.start().await.unwrap();
    wait_for_zones(&session, |zones| zone_is(zones, "z1", &ArmedState::Disarmed)).await;
    let mut events = session.events();

    drop(session);

    // The merger holds the last sender; it closes once its task is cancelled.
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            if let Err(tokio::sync::broadcast::error::RecvError::Closed) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "session tasks outlived the session");
}
