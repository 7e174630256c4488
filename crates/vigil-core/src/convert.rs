// ── API-to-domain type conversions ──
//
// Bridges raw `vigil_api` wire types into canonical `vigil_core::model`
// domain types, and turns raw stream frames into `Event`s.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use vigil_api::RawFrame;
use vigil_api::models::{DeviceEntry, ServiceStatusEntry, SpaceEntry, ZoneEntry};

use crate::error::CoreError;
use crate::model::{
    ArmMode, ArmedState, Device, EntityKind, EntityRef, Event, EventCategory, EventId,
    ServiceStatus, Space, Zone,
};

// ── Resources ────────────────────────────────────────────────────────

impl From<ZoneEntry> for Zone {
    fn from(z: ZoneEntry) -> Self {
        Zone {
            armed_state: ArmedState::parse(&z.armed_state),
            id: z.id,
            name: z.name,
            device_ids: z.device_ids,
            updated_at: z.updated_at,
        }
    }
}

impl From<DeviceEntry> for Device {
    fn from(d: DeviceEntry) -> Self {
        Device {
            id: d.id,
            name: d.name,
            status: d.status,
            zone_id: d.zone_id.filter(|z| !z.is_empty()),
            updated_at: d.updated_at,
        }
    }
}

impl From<SpaceEntry> for Space {
    fn from(s: SpaceEntry) -> Self {
        Space {
            id: s.id,
            name: s.name,
            status: s.status,
            member_count: s.member_count,
            updated_at: s.updated_at,
        }
    }
}

impl From<ServiceStatusEntry> for ServiceStatus {
    fn from(s: ServiceStatusEntry) -> Self {
        ServiceStatus {
            is_running: s.is_running,
            uptime: s.uptime.and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            events_processed: s.events_processed,
            connection_state: s.connection_state,
        }
    }
}

impl From<ArmMode> for vigil_api::models::ArmMode {
    fn from(mode: ArmMode) -> Self {
        match mode {
            ArmMode::Away => Self::Away,
            ArmMode::Stay => Self::Stay,
            ArmMode::Night => Self::Night,
        }
    }
}

// ── Stream frames ────────────────────────────────────────────────────

/// Event names that carry connection housekeeping rather than business data.
const CONTROL_EVENTS: &[&str] = &["keepalive", "keep-alive", "heartbeat", "ping", "connected"];

const ID_KEYS: &[&str] = &["id", "eventId"];
const TYPE_KEYS: &[&str] = &["type", "eventType"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "occurredAt", "createdAt"];
const STATE_KEYS: &[&str] = &["displayState", "state", "status"];
pub(crate) const ZONE_ID_KEYS: &[&str] = &["zoneId", "areaId"];
pub(crate) const ZONE_STATE_KEYS: &[&str] = &["zoneState", "areaState", "areaDisplayState"];

/// Decode one frame into an [`Event`].
///
/// `Ok(None)` means the frame carried nothing classifiable and is dropped.
/// A `data:` line that is not valid JSON is a [`CoreError::ProtocolParse`];
/// the caller logs it and keeps reading.
pub fn event_from_frame(
    frame: &RawFrame,
    received_at: DateTime<Utc>,
) -> Result<Option<Event>, CoreError> {
    let payload = match frame.data.as_deref().map(str::trim) {
        None | Some("") => Map::new(),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
            Err(e) => {
                return Err(CoreError::ProtocolParse {
                    message: format!("invalid JSON in frame {:?}: {e}", frame.event_name()),
                });
            }
        },
    };

    // Event name: the `event:` line, else the payload's own type, else its category.
    let Some(event_type) = frame
        .event_name()
        .or_else(|| str_field(&payload, TYPE_KEYS))
        .or_else(|| str_field(&payload, &["category"]))
        .map(str::to_owned)
    else {
        debug!(id = ?frame.id, "dropping unclassifiable frame");
        return Ok(None);
    };

    let entity = entity_ref(&payload);
    let category = classify(&event_type, &payload, entity.as_ref());
    let occurred_at = timestamp_field(&payload);
    let display_state = str_field(&payload, STATE_KEYS).map(str::to_owned);

    let id = str_field(&payload, ID_KEYS)
        .or(frame.id.as_deref().filter(|id| !id.is_empty()))
        .map_or_else(
            || {
                EventId::synthetic(
                    &event_type,
                    entity.as_ref(),
                    occurred_at.unwrap_or(received_at),
                )
            },
            EventId::from_server,
        );

    Ok(Some(Event {
        id,
        event_type,
        category,
        entity,
        occurred_at,
        received_at,
        display_state,
        payload,
    }))
}

fn classify(
    event_type: &str,
    payload: &Map<String, Value>,
    entity: Option<&EntityRef>,
) -> EventCategory {
    if CONTROL_EVENTS
        .iter()
        .any(|c| event_type.eq_ignore_ascii_case(c))
    {
        return EventCategory::Control;
    }
    if let Some(category) =
        str_field(payload, &["category"]).and_then(|c| EventCategory::from_str(c).ok())
    {
        return category;
    }
    match entity.map(|e| e.kind) {
        Some(EntityKind::Zone) => EventCategory::Zone,
        Some(EntityKind::Device) => EventCategory::Device,
        Some(EntityKind::Space) => EventCategory::Space,
        None => EventCategory::Unknown,
    }
}

/// Explicit `entityRef`, else inferred from the most specific id field.
fn entity_ref(payload: &Map<String, Value>) -> Option<EntityRef> {
    if let Some(explicit) = payload
        .get("entityRef")
        .and_then(|v| serde_json::from_value::<EntityRef>(v.clone()).ok())
    {
        return Some(explicit);
    }

    let name = str_field(payload, &["name", "entityName"]).map(str::to_owned);
    [
        (EntityKind::Device, &["deviceId"][..]),
        (EntityKind::Space, &["spaceId"][..]),
        (EntityKind::Zone, ZONE_ID_KEYS),
    ]
    .into_iter()
    .find_map(|(kind, keys)| {
        str_field(payload, keys).map(|id| EntityRef {
            kind,
            id: id.to_owned(),
            name: name.clone(),
        })
    })
}

fn str_field<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// RFC 3339 string or epoch milliseconds.
fn timestamp_field(payload: &Map<String, Value>) -> Option<DateTime<Utc>> {
    TIMESTAMP_KEYS.iter().find_map(|k| match payload.get(*k)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(event: Option<&str>, data: Option<&str>) -> RawFrame {
        RawFrame {
            event: event.map(str::to_owned),
            data: data.map(str::to_owned),
            id: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn decodes_zone_transition() {
        let f = frame(
            Some("area_state_change"),
            Some(
                r#"{"id":"e1","entityRef":{"kind":"zone","id":"z1","name":"Perimeter"},
                    "displayState":"ARMED_AWAY","timestamp":"2026-03-01T10:00:00Z"}"#,
            ),
        );
        let event = event_from_frame(&f, now()).unwrap().unwrap();
        assert_eq!(event.id, EventId::Server("e1".into()));
        assert_eq!(event.category, EventCategory::Zone);
        assert_eq!(event.entity.as_ref().unwrap().kind, EntityKind::Zone);
        assert_eq!(event.display_state.as_deref(), Some("ARMED_AWAY"));
        assert_eq!(
            event.occurred_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn empty_event_name_falls_back_to_payload_type() {
        let f = frame(Some(""), Some(r#"{"type":"device_fault","deviceId":"d1"}"#));
        let event = event_from_frame(&f, now()).unwrap().unwrap();
        assert_eq!(event.event_type, "device_fault");
        assert_eq!(event.category, EventCategory::Device);
    }

    #[test]
    fn payload_category_used_when_no_type() {
        let f = frame(None, Some(r#"{"category":"alarm","zoneId":"z1"}"#));
        let event = event_from_frame(&f, now()).unwrap().unwrap();
        assert_eq!(event.event_type, "alarm");
        assert_eq!(event.category, EventCategory::Alarm);
    }

    #[test]
    fn unclassifiable_frame_is_dropped() {
        let f = frame(None, Some(r#"{"foo":1}"#));
        assert!(event_from_frame(&f, now()).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let f = frame(Some("alarm"), Some("{not json"));
        let err = event_from_frame(&f, now()).unwrap_err();
        assert!(matches!(err, CoreError::ProtocolParse { .. }));
    }

    #[test]
    fn keepalive_is_control_even_without_data() {
        let event = event_from_frame(&frame(Some("keepalive"), None), now())
            .unwrap()
            .unwrap();
        assert!(event.is_control());
    }

    #[test]
    fn missing_ids_fall_back_to_frame_id_then_synthetic() {
        let mut f = frame(Some("zone_update"), Some(r#"{"zoneId":"z1","timestamp":1700000000000}"#));
        f.id = Some("77".into());
        let with_frame_id = event_from_frame(&f, now()).unwrap().unwrap();
        assert_eq!(with_frame_id.id, EventId::Server("77".into()));

        f.id = None;
        let a = event_from_frame(&f, now()).unwrap().unwrap();
        let b = event_from_frame(&f, now() + chrono::Duration::seconds(5))
            .unwrap()
            .unwrap();
        assert!(matches!(a.id, EventId::Synthetic(_)));
        assert_eq!(a.id, b.id, "same server timestamp, same identity");
    }

    #[test]
    fn zone_entry_converts() {
        let entry = ZoneEntry {
            id: "z1".into(),
            name: "Garage".into(),
            armed_state: "armed_stay".into(),
            device_ids: vec!["d1".into()],
            updated_at: None,
        };
        let zone = Zone::from(entry);
        assert_eq!(zone.armed_state, ArmedState::ArmedStay);
        assert_eq!(zone.device_ids, vec!["d1".to_owned()]);
    }

    #[test]
    fn negative_uptime_is_dropped() {
        let status = ServiceStatus::from(ServiceStatusEntry {
            is_running: true,
            uptime: Some(-1.0),
            events_processed: Some(3),
            connection_state: None,
        });
        assert!(status.uptime.is_none());
        assert_eq!(status.events_processed, Some(3));
    }
}
