// ── Snapshot application ──
//
// A polled snapshot is the authoritative membership of a collection:
// every listed entity goes through the recency rule, every unlisted one
// is dropped unless a push inside the priority window vouches for it.
// Pruning holds the entity's stamp slot, as pushes do.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use super::recency::{Stamp, UpdateSource, Verdict, judge};
use super::{StateReconciler, Stored};
use crate::model::{Device, Space, Zone};

/// Per-snapshot tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub applied: usize,
    /// Entities whose polled state lost to a newer or recently pushed one.
    pub stale: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl StateReconciler {
    pub fn apply_zone_snapshot(&self, zones: Vec<Zone>) -> SnapshotReport {
        self.apply_snapshot(zones)
    }

    pub fn apply_device_snapshot(&self, devices: Vec<Device>) -> SnapshotReport {
        self.apply_snapshot(devices)
    }

    pub fn apply_space_snapshot(&self, spaces: Vec<Space>) -> SnapshotReport {
        self.apply_snapshot(spaces)
    }

    pub(crate) fn apply_snapshot<T: Stored>(&self, items: Vec<T>) -> SnapshotReport {
        let collection = T::collection(self);
        let mut report = SnapshotReport::default();
        let mut seen = HashSet::with_capacity(items.len());

        for item in items {
            let id = item.id().to_owned();
            let next = Stamp {
                timestamp: item.updated_at(),
                source: UpdateSource::Poll,
                state: item.state_label().to_owned(),
                received_at: Instant::now(),
            };

            let merged = match self.stamps.entry((T::KIND, id.clone())) {
                Entry::Occupied(mut slot) => match judge(Some(slot.get()), &next, self.push_window) {
                    Verdict::Accept => {
                        slot.insert(next);
                        Some(item)
                    }
                    Verdict::Duplicate => Some(item),
                    Verdict::Stale => {
                        report.stale += 1;
                        // Keep the winning state, take everything else from the poll.
                        let kept = match collection.get(&id) {
                            Some(existing) => {
                                item.with_state(existing.state_label(), existing.updated_at())
                            }
                            None => item.with_state(&slot.get().state, slot.get().timestamp),
                        };
                        collection.upsert(&id, kept);
                        None
                    }
                },
                Entry::Vacant(slot) => {
                    slot.insert(next);
                    Some(item)
                }
            };

            if let Some(entity) = merged {
                if collection.upsert(&id, entity) {
                    report.applied += 1;
                } else {
                    report.unchanged += 1;
                }
            }
            seen.insert(id);
        }

        let now = Instant::now();
        for id in collection.ids() {
            if seen.contains(&id) {
                continue;
            }
            match self.stamps.entry((T::KIND, id.clone())) {
                Entry::Occupied(slot) => {
                    let stamp = slot.get();
                    if stamp.source == UpdateSource::Push
                        && now.saturating_duration_since(stamp.received_at) < self.push_window
                    {
                        debug!(kind = %T::KIND, %id, "unlisted but recently pushed, kept");
                        continue;
                    }
                    collection.remove(&id);
                    slot.remove();
                }
                Entry::Vacant(_) => {
                    collection.remove(&id);
                }
            }
            report.removed += 1;
        }

        debug!(
            kind = %T::KIND,
            applied = report.applied,
            stale = report.stale,
            unchanged = report.unchanged,
            removed = report.removed,
            "snapshot applied"
        );
        report
    }
}
