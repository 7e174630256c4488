// ── Event deduplication and merge ──
//
// Events can reach the engine more than once: over the live stream, via
// the status channel, and from retried requests. The merger is the single
// consumer of all of them. It admits each identity once, in arrival order,
// and hands business events to the reconciler.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::live::LiveMessage;
use crate::model::{Event, EventId};
use crate::store::{ApplyOutcome, StateReconciler};

/// Bounded memory of recently admitted event ids. Oldest ids are evicted
/// first once `capacity` is reached.
#[derive(Debug)]
pub struct EventDeduplicator {
    capacity: usize,
    seen: HashSet<EventId>,
    order: VecDeque<EventId>,
}

impl EventDeduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// `true` the first time an id is seen within the window.
    pub fn admit(&mut self, id: &EventId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.clone());
        self.order.push_back(id.clone());
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

/// Delivery path an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Origin {
    Stream,
    ControlChannel,
    Retry,
}

/// One item on the merger's input channel.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub origin: Origin,
    pub message: LiveMessage,
}

impl Inbound {
    pub fn event(origin: Origin, event: Event) -> Self {
        Self {
            origin,
            message: LiveMessage::Event(event),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Already admitted; dropped.
    Duplicate,
    /// Keep-alive or other control signal; broadcast only.
    Control,
    Applied(ApplyOutcome),
}

pub struct EventMerger {
    dedup: EventDeduplicator,
    reconciler: Arc<StateReconciler>,
    events_tx: broadcast::Sender<Arc<Event>>,
}

impl EventMerger {
    pub fn new(
        capacity: usize,
        reconciler: Arc<StateReconciler>,
        events_tx: broadcast::Sender<Arc<Event>>,
    ) -> Self {
        Self {
            dedup: EventDeduplicator::new(capacity),
            reconciler,
            events_tx,
        }
    }

    /// Process one inbound message.
    pub fn ingest(&mut self, inbound: Inbound) -> MergeOutcome {
        match inbound.message {
            LiveMessage::Event(event) => self.ingest_event(inbound.origin, event),
            LiveMessage::EntityStateChanged(update) => {
                // A replayed frame must not re-apply its state signal.
                if update
                    .event_id
                    .as_ref()
                    .is_some_and(|id| self.dedup.contains(id))
                {
                    return MergeOutcome::Duplicate;
                }
                MergeOutcome::Applied(self.reconciler.apply_update(&update))
            }
        }
    }

    fn ingest_event(&mut self, origin: Origin, event: Event) -> MergeOutcome {
        if !self.dedup.admit(&event.id) {
            trace!(id = %event.id, %origin, "duplicate event dropped");
            return MergeOutcome::Duplicate;
        }

        let event = Arc::new(event);
        let outcome = if event.is_control() {
            MergeOutcome::Control
        } else {
            MergeOutcome::Applied(self.reconciler.apply_event(&event))
        };
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
        outcome
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                inbound = rx.recv() => {
                    let Some(inbound) = inbound else { break };
                    let outcome = self.ingest(inbound);
                    trace!(?outcome, "merged");
                }
            }
        }
        debug!(remembered = self.dedup.len(), "event merger stopped");
    }
}
