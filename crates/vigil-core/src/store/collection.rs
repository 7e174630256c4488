// ── Reactive entity collection ──
//
// Concurrent id-keyed storage that republishes a sorted snapshot through
// a `watch` channel after every mutation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::stream::Snapshot;

pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_id: DashMap<String, Arc<T>>,
    snapshot: watch::Sender<Snapshot<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace. Returns `false` without notifying subscribers
    /// when the stored value is already equal.
    pub(crate) fn upsert(&self, id: &str, entity: T) -> bool {
        if self
            .by_id
            .get(id)
            .is_some_and(|existing| **existing == entity)
        {
            return false;
        }
        self.by_id.insert(id.to_owned(), Arc::new(entity));
        self.publish();
        true
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// First entity matching `pred`, in no particular order.
    pub(crate) fn find(&self, pred: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.by_id
            .iter()
            .find(|r| pred(r.value()))
            .map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.by_id.iter().map(|r| r.key().clone()).collect()
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        if self.by_id.is_empty() {
            return;
        }
        self.by_id.clear();
        self.publish();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_id
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
