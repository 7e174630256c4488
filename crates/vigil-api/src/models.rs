// Wire types for the platform's JSON endpoints.
//
// Field names follow the platform's camelCase. Everything optional on the
// wire stays optional here; conversion into domain types happens in
// vigil-core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Capture-service control ─────────────────────────────────────────

/// Status block returned by the control endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusEntry {
    pub is_running: bool,
    /// Seconds since the capture process started.
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub events_processed: Option<u64>,
    #[serde(default)]
    pub connection_state: Option<String>,
}

/// `GET` response: `{ "status": { ... } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusEnvelope {
    pub status: ServiceStatusEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
}

/// `POST` body: the action plus the scope the capture process serves.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest<'a> {
    pub action: ControlAction,
    pub organization_id: &'a str,
    pub location_id: &'a str,
}

/// `POST` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default)]
    pub status: Option<ServiceStatusEntry>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ── Resource collections ────────────────────────────────────────────

/// Collections arrive either wrapped (`{ "data": [...] }`) or bare.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Collection<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Collection<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

/// Single-entity responses: `{ "data": {...} }` or the bare object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Single<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Single<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

/// A zone (alarm area) as listed by `/locations/{loc}/zones`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "state", alias = "displayState")]
    pub armed_state: String,
    #[serde(default)]
    pub device_ids: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A device as listed by `/locations/{loc}/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "areaId")]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A space (room, door group) as listed by `/locations/{loc}/spaces`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ── Mutations ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmMode {
    Away,
    Stay,
    Night,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArmRequest {
    pub mode: ArmMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceCommandRequest<'a> {
    pub command: &'a str,
}
