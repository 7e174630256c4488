// ── Domain model ──

pub mod entity;
pub mod event;
pub mod status;

pub use entity::{ArmedState, Device, Entity, EntityKind, Space, Zone};
pub use event::{EntityRef, Event, EventCategory, EventId};
pub use status::ServiceStatus;

use serde::{Deserialize, Serialize};

/// Requested arming mode for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmMode {
    Away,
    Stay,
    Night,
}
