// ── Reconciled entity types ──

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use strum::EnumString;

use crate::poller::ChangeTracked;

/// The three entity families the reconciler tracks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum EntityKind {
    #[serde(alias = "area")]
    #[strum(to_string = "zone", serialize = "area")]
    Zone,
    #[strum(to_string = "device")]
    Device,
    #[strum(to_string = "space")]
    Space,
}

/// Arming state of a zone. Unrecognized values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ArmedState {
    Disarmed,
    ArmedAway,
    ArmedStay,
    ArmedNight,
    Arming,
    #[strum(serialize = "TRIGGERED", serialize = "ALARM")]
    Triggered,
    #[strum(default)]
    Other(String),
}

impl ArmedState {
    pub fn parse(raw: &str) -> Self {
        Self::from_str(raw.trim()).unwrap_or_else(|_| Self::Other(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Disarmed => "DISARMED",
            Self::ArmedAway => "ARMED_AWAY",
            Self::ArmedStay => "ARMED_STAY",
            Self::ArmedNight => "ARMED_NIGHT",
            Self::Arming => "ARMING",
            Self::Triggered => "TRIGGERED",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::ArmedAway | Self::ArmedStay | Self::ArmedNight)
    }
}

impl fmt::Display for ArmedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ArmedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub armed_state: ArmedState,
    /// Devices assigned to this zone, when the platform reports membership.
    pub device_ids: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub status: String,
    pub zone_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Space {
    pub id: String,
    pub name: String,
    pub status: String,
    pub member_count: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ── Entity trait ─────────────────────────────────────────────────────

/// What the reconciler needs from every entity family.
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// The state field recency is judged on (armed state or status).
    fn state_label(&self) -> &str;

    fn updated_at(&self) -> Option<DateTime<Utc>>;

    /// Copy of `self` with the state field and timestamp replaced.
    fn with_state(&self, state: &str, updated_at: Option<DateTime<Utc>>) -> Self;

    /// Minimal entity for a pushed update that arrives before any snapshot
    /// has described it.
    fn placeholder(
        id: &str,
        name: Option<&str>,
        state: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self;
}

impl Entity for Zone {
    const KIND: EntityKind = EntityKind::Zone;

    fn id(&self) -> &str {
        &self.id
    }

    fn state_label(&self) -> &str {
        self.armed_state.as_str()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn with_state(&self, state: &str, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            armed_state: ArmedState::parse(state),
            updated_at,
            ..self.clone()
        }
    }

    fn placeholder(
        id: &str,
        name: Option<&str>,
        state: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.to_owned(),
            name: name.unwrap_or_default().to_owned(),
            armed_state: ArmedState::parse(state),
            device_ids: Vec::new(),
            updated_at,
        }
    }
}

impl Entity for Device {
    const KIND: EntityKind = EntityKind::Device;

    fn id(&self) -> &str {
        &self.id
    }

    fn state_label(&self) -> &str {
        &self.status
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn with_state(&self, state: &str, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: state.to_owned(),
            updated_at,
            ..self.clone()
        }
    }

    fn placeholder(
        id: &str,
        name: Option<&str>,
        state: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.to_owned(),
            name: name.unwrap_or_default().to_owned(),
            status: state.to_owned(),
            zone_id: None,
            updated_at,
        }
    }
}

impl Entity for Space {
    const KIND: EntityKind = EntityKind::Space;

    fn id(&self) -> &str {
        &self.id
    }

    fn state_label(&self) -> &str {
        &self.status
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn with_state(&self, state: &str, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: state.to_owned(),
            updated_at,
            ..self.clone()
        }
    }

    fn placeholder(
        id: &str,
        name: Option<&str>,
        state: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.to_owned(),
            name: name.unwrap_or_default().to_owned(),
            status: state.to_owned(),
            member_count: None,
            updated_at,
        }
    }
}

// ── Change tracking ──────────────────────────────────────────────────
//
// `updated_at` is tracked: a re-stamped poll carrying an already-seen
// state still has to reach the reconciler, where it may outrank a push.

impl ChangeTracked for Zone {
    fn key(&self) -> &str {
        &self.id
    }

    fn tracked_eq(&self, other: &Self) -> bool {
        self.armed_state == other.armed_state
            && self.name == other.name
            && self.device_ids == other.device_ids
            && self.updated_at == other.updated_at
    }
}

impl ChangeTracked for Device {
    fn key(&self) -> &str {
        &self.id
    }

    fn tracked_eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.name == other.name
            && self.zone_id == other.zone_id
            && self.updated_at == other.updated_at
    }
}

impl ChangeTracked for Space {
    fn key(&self) -> &str {
        &self.id
    }

    fn tracked_eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.name == other.name
            && self.member_count == other.member_count
            && self.updated_at == other.updated_at
    }
}
