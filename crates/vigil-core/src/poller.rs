// ── Adaptive snapshot poller ──
//
// One task per poller. Each tick fetches the full collection, compares it
// against the previous fetch, and delivers it only when something tracked
// changed. The interval resets to `min_interval` on change and doubles
// toward `max_interval` otherwise.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backoff::BackoffPolicy;
use crate::config::Scope;
use crate::error::CoreError;

/// Items a poller can diff between fetches.
pub trait ChangeTracked: Clone + Send + Sync + 'static {
    /// Stable identity within the collection.
    fn key(&self) -> &str;

    /// `true` when every tracked mutable field matches.
    fn tracked_eq(&self, other: &Self) -> bool;
}

/// `true` if `next` differs from `prev` in size, membership, or any
/// tracked field of a shared id.
pub fn detect_change<T: ChangeTracked>(prev: &[T], next: &[T]) -> bool {
    if prev.len() != next.len() {
        return true;
    }
    let previous: HashMap<&str, &T> = prev.iter().map(|item| (item.key(), item)).collect();
    if previous.len() != next.len() {
        return true;
    }
    next.iter().any(|item| {
        previous
            .get(item.key())
            .is_none_or(|old| !old.tracked_eq(item))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl PollerConfig {
    fn policy(self) -> BackoffPolicy {
        BackoffPolicy::new(self.min_interval, self.max_interval)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        let polling = BackoffPolicy::polling();
        Self {
            min_interval: polling.base,
            max_interval: polling.cap,
        }
    }
}

/// A changed collection, tagged with the scope it was fetched for.
#[derive(Debug, Clone)]
pub struct PollDelivery<T> {
    pub scope: Scope,
    pub items: Vec<T>,
}

/// Builds poll tasks that deliver into one channel.
pub struct SmartPoller<T: ChangeTracked> {
    name: &'static str,
    config: PollerConfig,
    tx: mpsc::Sender<PollDelivery<T>>,
}

impl<T: ChangeTracked> SmartPoller<T> {
    pub fn new(
        name: &'static str,
        config: PollerConfig,
        tx: mpsc::Sender<PollDelivery<T>>,
    ) -> Self {
        Self { name, config, tx }
    }

    /// Spawn the poll task for `scope`. The first fetch runs immediately.
    pub fn start<F, Fut>(&self, scope: Scope, fetch: F, cancel: &CancellationToken) -> PollerHandle
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, CoreError>> + Send + 'static,
    {
        let cancel = cancel.child_token();
        let (interval_tx, interval_rx) = watch::channel(self.config.min_interval);
        let shared = Arc::new(PollShared {
            wake: Notify::new(),
            in_flight: AtomicBool::new(false),
        });

        let task = tokio::spawn(poll_task(
            self.name,
            self.config.policy(),
            scope,
            fetch,
            self.tx.clone(),
            interval_tx,
            Arc::clone(&shared),
            cancel.clone(),
        ));

        PollerHandle {
            cancel,
            shared,
            interval: interval_rx,
            task,
        }
    }
}

struct PollShared {
    wake: Notify,
    in_flight: AtomicBool,
}

/// Control surface for one running poll task.
pub struct PollerHandle {
    cancel: CancellationToken,
    shared: Arc<PollShared>,
    interval: watch::Receiver<Duration>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Request an immediate tick. Returns `false` (and does nothing) while
    /// a fetch is already in flight; triggers are never queued.
    pub fn trigger(&self) -> bool {
        if self.shared.in_flight.load(Ordering::Acquire) {
            debug!("poll trigger skipped: fetch in flight");
            return false;
        }
        self.shared.wake.notify_one();
        true
    }

    pub fn is_fetching(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Current delay between ticks.
    pub fn interval(&self) -> watch::Receiver<Duration> {
        self.interval.clone()
    }

    /// Cancel the task. An in-flight fetch is dropped and its result never
    /// delivered.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_task<T, F, Fut>(
    name: &'static str,
    policy: BackoffPolicy,
    scope: Scope,
    fetch: F,
    tx: mpsc::Sender<PollDelivery<T>>,
    interval_tx: watch::Sender<Duration>,
    shared: Arc<PollShared>,
    cancel: CancellationToken,
) where
    T: ChangeTracked,
    F: Fn(Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, CoreError>> + Send + 'static,
{
    let mut previous: Option<Vec<T>> = None;
    let mut quiet_ticks: u32 = 0;

    loop {
        shared.in_flight.store(true, Ordering::Release);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = fetch(scope.clone()) => result,
        };
        shared.in_flight.store(false, Ordering::Release);

        let changed = match result {
            Ok(items) => {
                let changed = previous
                    .as_deref()
                    .is_none_or(|prev| detect_change(prev, &items));
                if changed {
                    debug!(poller = name, count = items.len(), "collection changed");
                    let delivery = PollDelivery {
                        scope: scope.clone(),
                        items: items.clone(),
                    };
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        sent = tx.send(delivery) => if sent.is_err() { break },
                    }
                    previous = Some(items);
                }
                changed
            }
            Err(e) => {
                warn!(poller = name, error = %e, "poll fetch failed");
                false
            }
        };

        quiet_ticks = if changed {
            0
        } else {
            quiet_ticks.saturating_add(1)
        };
        let interval = policy.next_delay(quiet_ticks);
        interval_tx.send_replace(interval);
        trace!(poller = name, ?interval, "next poll scheduled");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
            () = shared.wake.notified() => debug!(poller = name, "poll triggered"),
        }
    }

    shared.in_flight.store(false, Ordering::Release);
    debug!(poller = name, location = %scope.location_id, "poller stopped");
}
