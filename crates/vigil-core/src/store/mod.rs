// ── Reconciled entity state ──
//
// The only writer of zone, device, and space state. Pushed events and
// polled snapshots both pass through the recency rule per entity id;
// there is no global ordering between the two sources.

mod collection;
mod recency;
mod snapshot;

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::convert::{ZONE_ID_KEYS, ZONE_STATE_KEYS};
use crate::model::{Device, Entity, EntityKind, Event, EventId, Space, Zone};
use crate::stream::EntityStream;

pub(crate) use collection::EntityCollection;
pub use recency::{Stamp, UpdateSource};
pub use snapshot::SnapshotReport;

use recency::{Verdict, judge};

/// A single state change for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUpdate {
    pub kind: EntityKind,
    pub id: String,
    pub name: Option<String>,
    /// Armed state for zones, status for devices and spaces.
    pub state: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: UpdateSource,
    /// Event the update was derived from, if any.
    pub event_id: Option<EventId>,
}

impl EntityUpdate {
    /// The update an event carries about its own entity, if it names one
    /// and reports a state.
    pub fn from_event(event: &Event) -> Option<Self> {
        let entity = event.entity.as_ref()?;
        let state = event.display_state.clone()?;
        Some(Self {
            kind: entity.kind,
            id: entity.id.clone(),
            name: entity.name.clone(),
            state,
            timestamp: event.occurred_at,
            source: UpdateSource::Push,
            event_id: Some(event.id.clone()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Entity state changed.
    Applied,
    /// Rejected by the recency rule.
    Stale,
    /// Accepted, or a repeat, but nothing visible changed.
    Unchanged,
}

/// Ask the session to re-fetch a collection because an event could not be
/// placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub kind: EntityKind,
    /// The entity whose event triggered the request.
    pub cause: String,
}

/// Collections reachable by entity type.
pub(crate) trait Stored: Entity {
    fn collection(store: &StateReconciler) -> &EntityCollection<Self>;
}

impl Stored for Zone {
    fn collection(store: &StateReconciler) -> &EntityCollection<Self> {
        &store.zones
    }
}

impl Stored for Device {
    fn collection(store: &StateReconciler) -> &EntityCollection<Self> {
        &store.devices
    }
}

impl Stored for Space {
    fn collection(store: &StateReconciler) -> &EntityCollection<Self> {
        &store.spaces
    }
}

pub struct StateReconciler {
    zones: EntityCollection<Zone>,
    devices: EntityCollection<Device>,
    spaces: EntityCollection<Space>,
    stamps: DashMap<(EntityKind, String), Stamp>,
    push_window: Duration,
    refresh_tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl StateReconciler {
    /// Build an empty reconciler and the receiver for its refresh requests.
    pub fn new(push_window: Duration) -> (Self, mpsc::UnboundedReceiver<RefreshRequest>) {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let store = Self {
            zones: EntityCollection::new(),
            devices: EntityCollection::new(),
            spaces: EntityCollection::new(),
            stamps: DashMap::new(),
            push_window,
            refresh_tx,
        };
        (store, refresh_rx)
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Apply one update through the recency rule.
    pub fn apply_update(&self, update: &EntityUpdate) -> ApplyOutcome {
        match update.kind {
            EntityKind::Zone => self.apply_pushed::<Zone>(update),
            EntityKind::Device => self.apply_pushed::<Device>(update),
            EntityKind::Space => self.apply_pushed::<Space>(update),
        }
    }

    /// Apply a business event: its own entity first, then, for device
    /// events that report a zone state, the containing zone.
    pub fn apply_event(&self, event: &Event) -> ApplyOutcome {
        if event.is_control() {
            return ApplyOutcome::Unchanged;
        }
        let Some(update) = EntityUpdate::from_event(event) else {
            trace!(event = %event.id, "event carries no entity state");
            return ApplyOutcome::Unchanged;
        };
        let outcome = self.apply_update(&update);

        if update.kind == EntityKind::Device {
            self.derive_zone_update(event, &update);
        }
        outcome
    }

    fn derive_zone_update(&self, event: &Event, device: &EntityUpdate) {
        let Some(zone_state) = event.payload_str(ZONE_STATE_KEYS) else {
            return;
        };

        let Some(zone_id) = self.containing_zone(event, &device.id) else {
            debug!(device = %device.id, "zone for device unknown, requesting refresh");
            let _ = self.refresh_tx.send(RefreshRequest {
                kind: EntityKind::Zone,
                cause: device.id.clone(),
            });
            return;
        };

        let outcome = self.apply_update(&EntityUpdate {
            kind: EntityKind::Zone,
            id: zone_id,
            name: None,
            state: zone_state.to_owned(),
            timestamp: device.timestamp,
            source: device.source,
            event_id: device.event_id.clone(),
        });
        trace!(device = %device.id, ?outcome, "derived zone update");
    }

    /// Explicit zone id in the payload, then the device's own zone, then
    /// zone membership lists.
    fn containing_zone(&self, event: &Event, device_id: &str) -> Option<String> {
        if let Some(id) = event.payload_str(ZONE_ID_KEYS) {
            return Some(id.to_owned());
        }
        if let Some(zone_id) = self.devices.get(device_id).and_then(|d| d.zone_id.clone()) {
            return Some(zone_id);
        }
        self.zones
            .find(|z| z.device_ids.iter().any(|d| d == device_id))
            .map(|z| z.id.clone())
    }

    fn apply_pushed<T: Stored>(&self, update: &EntityUpdate) -> ApplyOutcome {
        let collection = T::collection(self);
        let next = Stamp {
            timestamp: update.timestamp,
            source: update.source,
            state: update.state.clone(),
            received_at: Instant::now(),
        };

        match self.stamps.entry((T::KIND, update.id.clone())) {
            Entry::Occupied(mut slot) => match judge(Some(slot.get()), &next, self.push_window) {
                Verdict::Duplicate => ApplyOutcome::Unchanged,
                Verdict::Stale => {
                    debug!(kind = %T::KIND, id = %update.id, "stale update ignored");
                    ApplyOutcome::Stale
                }
                Verdict::Accept => {
                    slot.insert(next);
                    write_state(collection, update)
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(next);
                write_state(collection, update)
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Drop all entities and recency history (scope change).
    pub fn clear(&self) {
        self.zones.clear();
        self.devices.clear();
        self.spaces.clear();
        self.stamps.clear();
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn zones(&self) -> EntityStream<Zone> {
        EntityStream::new(self.zones.subscribe())
    }

    pub fn devices(&self) -> EntityStream<Device> {
        EntityStream::new(self.devices.subscribe())
    }

    pub fn spaces(&self) -> EntityStream<Space> {
        EntityStream::new(self.spaces.subscribe())
    }

    pub fn zone(&self, id: &str) -> Option<std::sync::Arc<Zone>> {
        self.zones.get(id)
    }

    pub fn device(&self, id: &str) -> Option<std::sync::Arc<Device>> {
        self.devices.get(id)
    }

    pub fn space(&self, id: &str) -> Option<std::sync::Arc<Space>> {
        self.spaces.get(id)
    }

    /// Last applied stamp for an entity.
    pub fn stamp(&self, kind: EntityKind, id: &str) -> Option<Stamp> {
        self.stamps
            .get(&(kind, id.to_owned()))
            .map(|s| s.value().clone())
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Zone => self.zones.len(),
            EntityKind::Device => self.devices.len(),
            EntityKind::Space => self.spaces.len(),
        }
    }
}

/// Write an accepted pushed state onto the stored entity, creating a
/// placeholder for ids no snapshot has described yet.
fn write_state<T: Entity>(collection: &EntityCollection<T>, update: &EntityUpdate) -> ApplyOutcome {
    let entity = match collection.get(&update.id) {
        Some(existing) => {
            let timestamp = update.timestamp.or(existing.updated_at());
            existing.with_state(&update.state, timestamp)
        }
        None => T::placeholder(
            &update.id,
            update.name.as_deref(),
            &update.state,
            update.timestamp,
        ),
    };
    if collection.upsert(&update.id, entity) {
        ApplyOutcome::Applied
    } else {
        ApplyOutcome::Unchanged
    }
}
