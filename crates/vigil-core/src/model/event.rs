// ── Event domain types ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumString;
use uuid::Uuid;

use super::entity::EntityKind;

/// Stable identity of an event, used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventId {
    /// Server-issued UUID.
    Uuid(Uuid),
    /// Server-issued id in some other format.
    Server(String),
    /// Derived from `(type, entity, timestamp)` when the server sent none.
    Synthetic(String),
}

impl EventId {
    /// Classify a server-issued id.
    pub fn from_server(raw: &str) -> Self {
        Uuid::parse_str(raw).map_or_else(|_| Self::Server(raw.to_owned()), Self::Uuid)
    }

    /// Deterministic id for an event the server did not identify. Two
    /// frames agreeing on all three inputs collapse to one id.
    pub fn synthetic(
        event_type: &str,
        entity: Option<&EntityRef>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let entity = entity.map_or_else(String::new, |e| format!("{}:{}", e.kind, e.id));
        Self::Synthetic(format!(
            "{event_type}|{entity}|{}",
            timestamp.timestamp_micros()
        ))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(id) => write!(f, "{id}"),
            Self::Server(id) | Self::Synthetic(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[non_exhaustive]
pub enum EventCategory {
    Alarm,
    Arming,
    Zone,
    Device,
    Space,
    System,
    /// Keep-alives and connection notices. Forwarded, never reconciled.
    Control,
    Unknown,
}

/// Reference from an event to the entity it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A decoded, immutable event from the live stream or the status channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: String,
    pub category: EventCategory,
    pub entity: Option<EntityRef>,
    /// Time the platform says the event happened, when it said.
    pub occurred_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub display_state: Option<String>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Occurrence time, falling back to arrival time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.occurred_at.unwrap_or(self.received_at)
    }

    pub fn is_control(&self) -> bool {
        self.category == EventCategory::Control
    }

    /// First string value among `keys` in the payload.
    pub fn payload_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.payload.get(*k).and_then(serde_json::Value::as_str))
            .filter(|s| !s.is_empty())
    }
}
