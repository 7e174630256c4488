#![allow(clippy::unwrap_used)]
// Integration tests for `ApiClient` using wiremock.

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::SecretString;
use serde_json::json;
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil_api::models::ArmMode;
use vigil_api::{ApiClient, Credentials, Error, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient) {
    setup_with(TransportConfig::default()).await
}

async fn setup_with(transport: TransportConfig) -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let creds = Credentials::new(SecretString::from("test-key".to_string()), "org-1");
    let client = ApiClient::new(base_url, &creds, &transport).unwrap();
    (server, client)
}

// ── Control endpoint ────────────────────────────────────────────────

#[tokio::test]
async fn test_service_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/capture-service"))
        .and(header("x-api-key", "test-key"))
        .and(header("x-organization-id", "org-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {
                "isRunning": true,
                "uptime": 120.5,
                "eventsProcessed": 42,
                "connectionState": "connected"
            }
        })))
        .mount(&server)
        .await;

    let status = assert_ok!(client.service_status().await);
    assert!(status.is_running);
    assert_eq!(status.events_processed, Some(42));
    assert_eq!(status.connection_state.as_deref(), Some("connected"));
}

#[tokio::test]
async fn test_start_service_sends_scope() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/capture-service"))
        .and(body_json(json!({
            "action": "start",
            "organizationId": "org-1",
            "locationId": "loc-7"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": { "isRunning": true }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = assert_ok!(client.start_service("loc-7").await);
    assert!(resp.status.unwrap().is_running);
}

#[tokio::test]
async fn test_control_rejection() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/capture-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "capture already stopping"
        })))
        .mount(&server)
        .await;

    let err = client.stop_service("loc-7").await.unwrap_err();
    assert!(
        matches!(err, Error::Rejected { ref message } if message == "capture already stopping"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_unauthorized_maps_to_authorization() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/capture-service"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let err = client.service_status().await.unwrap_err();
    assert!(err.is_authorization(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_slow_control_call_times_out() {
    let transport = TransportConfig {
        timeout: Duration::from_millis(200),
        ..TransportConfig::default()
    };
    let (server, client) = setup_with(transport).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/capture-service"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": {"isRunning": false}}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client.service_status().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {err:?}");
    assert!(err.is_transient());
}

// ── Resources ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_zones() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/locations/loc-1/zones"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "z1",
                    "name": "Perimeter",
                    "armedState": "ARMED_AWAY",
                    "deviceIds": ["d1", "d2"],
                    "updatedAt": "2026-03-01T10:00:00Z"
                },
                { "id": "z2", "name": "Garage", "armedState": "DISARMED" }
            ]
        })))
        .mount(&server)
        .await;

    let zones = client.list_zones("loc-1").await.unwrap();
    assert_eq!(zones.len(), 2);
    assert_eq!(zones[0].armed_state, "ARMED_AWAY");
    assert_eq!(zones[0].device_ids, vec!["d1", "d2"]);
    assert!(zones[0].updated_at.is_some());
    assert!(zones[1].updated_at.is_none());
}

#[tokio::test]
async fn test_list_devices_bare_array() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/locations/loc-1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "d1", "name": "Front door", "status": "closed", "zoneId": "z1" }
        ])))
        .mount(&server)
        .await;

    let devices = client.list_devices("loc-1").await.unwrap();
    assert_eq!(devices[0].zone_id.as_deref(), Some("z1"));
}

#[tokio::test]
async fn test_malformed_collection_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/locations/loc-1/spaces"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.list_spaces("loc-1").await.unwrap_err();
    assert!(
        matches!(err, Error::Deserialization { ref body, .. } if body.contains("oops")),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_arm_zone_posts_mode() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/locations/loc-1/zones/z1/arm"))
        .and(body_json(json!({ "mode": "away" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(client.arm_zone("loc-1", "z1", ArmMode::Away).await);
}

#[tokio::test]
async fn test_disarm_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/locations/loc-1/zones/z1/disarm"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "message": "invalid PIN" })),
        )
        .mount(&server)
        .await;

    let err = client.disarm_zone("loc-1", "z1").await.unwrap_err();
    assert!(matches!(err, Error::Rejected { .. }), "unexpected error: {err:?}");
}

// ── Event stream ────────────────────────────────────────────────────

#[tokio::test]
async fn test_event_stream_frames() {
    let (server, client) = setup().await;

    let body = concat!(
        ": hello\n\n",
        "event: area_state_change\n",
        "data: {\"id\":\"e1\",\"displayState\":\"ARMED_AWAY\"}\n\n",
        "event: keepalive\n",
        "data: {}\n\n",
    );

    Mock::given(method("GET"))
        .and(path("/api/v1/events/stream"))
        .and(query_param("locationId", "loc-1"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let frames: Vec<_> = client
        .open_event_stream("loc-1")
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(frames.len(), 2);
    let first = frames[0].as_ref().unwrap();
    assert_eq!(first.event.as_deref(), Some("area_state_change"));
    assert!(first.data.as_deref().unwrap().contains("ARMED_AWAY"));
    assert_eq!(
        frames[1].as_ref().unwrap().event.as_deref(),
        Some("keepalive")
    );
}

#[tokio::test]
async fn test_event_stream_wrong_content_type() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/events/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
        .mount(&server)
        .await;

    let result = client.open_event_stream("loc-1").await;
    assert!(matches!(result, Err(Error::Stream(_))));
}

#[tokio::test]
async fn test_event_stream_forbidden() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/events/stream"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = client.open_event_stream("loc-1").await;
    assert!(matches!(result, Err(Error::Authorization { status: 403, .. })));
}
