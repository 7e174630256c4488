// ── Entity subscriptions ──
//
// Read-side handles over the reconciler's collections. Only the
// reconciler writes; these types observe.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Immutable, id-sorted view of one collection.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// A subscription to one entity collection.
///
/// `current()` is the snapshot as of creation or the last `changed()`;
/// `latest()` always reads through to the live value.
pub struct EntityStream<T: Clone + Send + Sync + 'static> {
    current: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(mut receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    pub fn current(&self) -> &Snapshot<T> {
        &self.current
    }

    pub fn latest(&self) -> Snapshot<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next mutation. `None` once the session is dropped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        self.current = self.receiver.borrow_and_update().clone();
        Some(Arc::clone(&self.current))
    }

    /// Wait until some snapshot satisfies `pred`, checking the current one
    /// first.
    pub async fn wait_for(&mut self, pred: impl Fn(&[Arc<T>]) -> bool) -> Option<Snapshot<T>> {
        let snap = self.receiver.wait_for(|snap| pred(snap)).await.ok()?.clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Stream of snapshots, starting with the current one.
    pub fn into_stream(self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.receiver)
    }
}
