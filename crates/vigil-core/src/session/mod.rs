// ── Sync session ──
//
// Entry point for consumers. Owns one instance of every component for the
// active scope: capture-service supervisor, live stream, event merger,
// three pollers, cache, and reconciler. Scope changes tear the per-scope
// tasks down explicitly and build them again.
//
// Background tasks hold `Weak<SessionInner>`; dropping the last
// `SyncSession` cancels them even without `shutdown()`.

mod fetch;

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_api::{ApiClient, Credentials, TlsMode, TransportConfig};

use crate::config::{Scope, SyncConfig, TlsVerification};
use crate::dedup::{EventMerger, Inbound, Origin};
use crate::error::CoreError;
use crate::live::{ConnectionStatus, LiveMessage, LiveStreamClient};
use crate::model::{ArmMode, Device, EntityKind, Event, ServiceStatus, Space, Zone};
use crate::poller::{ChangeTracked, PollDelivery, PollerHandle, SmartPoller};
use crate::store::{RefreshRequest, SnapshotReport, StateReconciler, Stored};
use crate::stream::EntityStream;
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorState, TerminalFailure};

use fetch::{Listed, SessionCache, invalidate_kind, list_cached, zone_cached};

const EVENT_CHANNEL_SIZE: usize = 256;
const INBOUND_CHANNEL_SIZE: usize = 256;
const DELIVERY_CHANNEL_SIZE: usize = 8;

// ── SyncSession ──────────────────────────────────────────────────────

/// Real-time view of one organization and location.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Nothing runs until
/// [`start()`](Self::start); [`shutdown()`](Self::shutdown) is final.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SyncConfig,
    client: ApiClient,
    cache: Arc<SessionCache>,
    reconciler: Arc<StateReconciler>,
    supervisor: ConnectionSupervisor<ApiClient>,
    live: LiveStreamClient<ApiClient>,
    events_tx: broadcast::Sender<Arc<Event>>,
    scope: watch::Sender<Scope>,
    /// Bumped whenever the per-scope tasks are replaced. Results carrying
    /// an older generation are discarded.
    generation: AtomicU64,
    cancel: CancellationToken,
    /// Serializes start, scope switches, and shutdown.
    lifecycle: Mutex<()>,
    epoch: Mutex<Option<Epoch>>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<RefreshRequest>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Tasks and handles bound to one scope.
struct Epoch {
    generation: u64,
    cancel: CancellationToken,
    inbound_tx: mpsc::Sender<Inbound>,
    zones: PollerHandle,
    devices: PollerHandle,
    spaces: PollerHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Epoch {
    fn poller(&self, kind: EntityKind) -> &PollerHandle {
        match kind {
            EntityKind::Zone => &self.zones,
            EntityKind::Device => &self.devices,
            EntityKind::Space => &self.spaces,
        }
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.zones.shutdown().await;
        self.devices.shutdown().await;
        self.spaces.shutdown().await;
        for task in self.tasks {
            let _ = task.await;
        }
        debug!(generation = self.generation, "sync epoch stopped");
    }
}

impl SyncSession {
    /// Build a session and its HTTP client. Does not touch the network.
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_mode(&config.tls),
            timeout: config.control_timeout,
            ..TransportConfig::default()
        };
        let credentials = Credentials::new(
            config.auth.api_key.clone(),
            config.scope.organization_id.clone(),
        );
        let client = ApiClient::new(config.url.clone(), &credentials, &transport)?;
        Ok(Self::with_client(config, client))
    }

    /// Build a session around an existing client.
    pub fn with_client(config: SyncConfig, client: ApiClient) -> Self {
        let (reconciler, refresh_rx) = StateReconciler::new(config.push_priority_window);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (scope, _) = watch::channel(config.scope.clone());
        let supervisor =
            ConnectionSupervisor::new(client.clone(), SupervisorConfig::from_sync_config(&config));
        let live = LiveStreamClient::new(Arc::new(client.clone()), config.stream_backoff);

        Self {
            inner: Arc::new(SessionInner {
                config,
                client,
                cache: Arc::new(SessionCache::new()),
                reconciler: Arc::new(reconciler),
                supervisor,
                live,
                events_tx,
                scope,
                generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                lifecycle: Mutex::new(()),
                epoch: Mutex::new(None),
                refresh_rx: Mutex::new(Some(refresh_rx)),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn reconciler(&self) -> &Arc<StateReconciler> {
        &self.inner.reconciler
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the capture service, open the live stream, and begin polling.
    ///
    /// A capture service that cannot be started is reported through
    /// [`terminal_failure()`](Self::terminal_failure) and the session keeps
    /// streaming and polling. Rejected credentials fail the call.
    pub async fn start(&self) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.spawn_deferred_refresh().await;

        let scope = self.scope();
        self.ensure_service(&scope).await?;
        self.begin_epoch(scope).await;
        info!("sync session started");
        Ok(())
    }

    /// Move to another location in the same organization.
    ///
    /// In-flight polls are cancelled and their results dropped, the stream
    /// is closed, and all entity state is cleared before anything is
    /// fetched for the new location.
    pub async fn switch_scope(&self, location_id: &str) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let previous = self.scope();
        if previous.location_id == location_id {
            return Ok(());
        }
        let next = previous.with_location(location_id);
        info!(from = %previous.location_id, to = %next.location_id, "switching location");

        self.end_epoch().await;
        self.inner.live.close().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.reconciler.clear();
        self.inner.scope.send_replace(next.clone());

        let service = self.ensure_service(&next).await;
        self.begin_epoch(next).await;
        service
    }

    /// Stop everything and stop the capture service (best-effort).
    pub async fn shutdown(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.end_epoch().await;
        self.inner.live.close().await;
        self.inner.supervisor.stop(&self.scope()).await;
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("sync session shut down");
    }

    /// User-initiated retry after a terminal capture-service failure.
    pub async fn retry_service(&self) -> Result<(), CoreError> {
        self.inner.supervisor.restart(&self.scope()).await
    }

    /// Query the capture service once.
    pub async fn check_service_status(&self) -> Result<ServiceStatus, CoreError> {
        self.inner.supervisor.check_status().await
    }

    async fn ensure_service(&self, scope: &Scope) -> Result<(), CoreError> {
        match self.inner.supervisor.start(scope).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_authorization() => Err(e),
            Err(e) => {
                warn!(error = %e, "capture service unavailable, continuing with stream and polling");
                Ok(())
            }
        }
    }

    async fn begin_epoch(&self, scope: Scope) {
        let mut slot = self.inner.epoch.lock().await;
        if let Some(previous) = slot.take() {
            previous.shutdown().await;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.inner.cancel.child_token();
        let mut tasks = Vec::new();

        // Live stream → bridge → merger → reconciler
        let live_rx = self.inner.live.connect(scope.clone(), &cancel).await;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        let merger = EventMerger::new(
            self.inner.config.dedup_window,
            Arc::clone(&self.inner.reconciler),
            self.inner.events_tx.clone(),
        );
        tasks.push(tokio::spawn(merger.run(inbound_rx, cancel.clone())));
        tasks.push(tokio::spawn(bridge_task(
            live_rx,
            inbound_tx.clone(),
            cancel.clone(),
        )));

        // Pollers → apply task → reconciler
        let (zones_tx, zones_rx) = mpsc::channel(DELIVERY_CHANNEL_SIZE);
        let (devices_tx, devices_rx) = mpsc::channel(DELIVERY_CHANNEL_SIZE);
        let (spaces_tx, spaces_rx) = mpsc::channel(DELIVERY_CHANNEL_SIZE);
        let zones = self.spawn_poller::<Zone>("zones", zones_tx, &scope, &cancel);
        let devices = self.spawn_poller::<Device>("devices", devices_tx, &scope, &cancel);
        let spaces = self.spawn_poller::<Space>("spaces", spaces_tx, &scope, &cancel);
        tasks.push(tokio::spawn(apply_task(
            Arc::downgrade(&self.inner),
            generation,
            Deliveries {
                zones: zones_rx,
                devices: devices_rx,
                spaces: spaces_rx,
            },
            cancel.clone(),
        )));

        debug!(generation, location = %scope.location_id, "sync epoch started");
        *slot = Some(Epoch {
            generation,
            cancel,
            inbound_tx,
            zones,
            devices,
            spaces,
            tasks,
        });
    }

    async fn end_epoch(&self) {
        let epoch = self.inner.epoch.lock().await.take();
        if let Some(epoch) = epoch {
            epoch.shutdown().await;
        }
    }

    fn spawn_poller<T: Listed + ChangeTracked>(
        &self,
        name: &'static str,
        tx: mpsc::Sender<PollDelivery<T>>,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> PollerHandle {
        let client = self.inner.client.clone();
        let cache = Arc::clone(&self.inner.cache);
        let ttl = self.inner.config.cache_ttl;
        SmartPoller::new(name, self.inner.config.poll, tx).start(
            scope.clone(),
            move |scope: Scope| {
                let client = client.clone();
                let cache = Arc::clone(&cache);
                async move { list_cached::<T>(&client, &cache, ttl, &scope).await }
            },
            cancel,
        )
    }

    async fn spawn_deferred_refresh(&self) {
        let Some(rx) = self.inner.refresh_rx.lock().await.take() else {
            return;
        };
        let cancel = self.inner.cancel.child_token();
        let task = deferred_refresh_task(
            Arc::downgrade(&self.inner),
            self.inner.config.deferred_refresh_delay,
            rx,
            cancel,
        );
        self.inner.task_handles.lock().await.push(tokio::spawn(task));
    }

    // ── Mutations ────────────────────────────────────────────────────

    pub async fn arm_zone(&self, zone_id: &str, mode: ArmMode) -> Result<(), CoreError> {
        let scope = self.scope();
        self.inner
            .client
            .arm_zone(&scope.location_id, zone_id, mode.into())
            .await?;
        info!(zone = zone_id, ?mode, "zone armed");
        self.refetch_after_mutation(EntityKind::Zone, &scope).await;
        Ok(())
    }

    pub async fn disarm_zone(&self, zone_id: &str) -> Result<(), CoreError> {
        let scope = self.scope();
        self.inner
            .client
            .disarm_zone(&scope.location_id, zone_id)
            .await?;
        info!(zone = zone_id, "zone disarmed");
        self.refetch_after_mutation(EntityKind::Zone, &scope).await;
        Ok(())
    }

    pub async fn send_device_command(&self, device_id: &str, command: &str) -> Result<(), CoreError> {
        let scope = self.scope();
        self.inner
            .client
            .send_device_command(&scope.location_id, device_id, command)
            .await?;
        info!(device = device_id, command, "device command sent");
        self.refetch_after_mutation(EntityKind::Device, &scope).await;
        Ok(())
    }

    /// Invalidate, then refetch. Never the other way round.
    async fn refetch_after_mutation(&self, kind: EntityKind, scope: &Scope) {
        invalidate_kind(&self.inner.cache, kind, scope);
        self.trigger_or_refresh(kind).await;
    }

    /// Wake the poller for `kind`; if it is mid-fetch (or not running),
    /// fetch directly instead.
    async fn trigger_or_refresh(&self, kind: EntityKind) {
        let triggered = self
            .inner
            .epoch
            .lock()
            .await
            .as_ref()
            .is_some_and(|epoch| epoch.poller(kind).trigger());
        if triggered {
            return;
        }
        invalidate_kind(&self.inner.cache, kind, &self.scope());
        if let Err(e) = self.refresh(kind).await {
            warn!(%kind, error = %e, "refetch failed");
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Cache-aware fetch of one collection, applied as a poll snapshot.
    pub async fn refresh(&self, kind: EntityKind) -> Result<SnapshotReport, CoreError> {
        match kind {
            EntityKind::Zone => self.refresh_listed::<Zone>().await,
            EntityKind::Device => self.refresh_listed::<Device>().await,
            EntityKind::Space => self.refresh_listed::<Space>().await,
        }
    }

    async fn refresh_listed<T: Listed>(&self) -> Result<SnapshotReport, CoreError> {
        let scope = self.scope();
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let items =
            list_cached::<T>(&self.inner.client, &self.inner.cache, self.inner.config.cache_ttl, &scope)
                .await?;
        self.inner.check_current(generation, &scope)?;
        Ok(self.inner.reconciler.apply_snapshot(items))
    }

    /// Cache-aware detail fetch for one zone. Does not touch reconciled
    /// state.
    pub async fn fetch_zone(&self, zone_id: &str) -> Result<Zone, CoreError> {
        zone_cached(
            &self.inner.client,
            &self.inner.cache,
            self.inner.config.cache_ttl,
            &self.scope(),
            zone_id,
        )
        .await
    }

    /// Feed an event that arrived outside the live stream (status channel,
    /// retried request). Duplicates of streamed events are dropped.
    pub async fn ingest(&self, origin: Origin, event: Event) -> Result<(), CoreError> {
        let tx = self
            .inner
            .epoch
            .lock()
            .await
            .as_ref()
            .map(|epoch| epoch.inbound_tx.clone())
            .ok_or_else(|| CoreError::Internal("session not started".into()))?;
        tx.send(Inbound::event(origin, event))
            .await
            .map_err(|_| CoreError::Internal("event merger stopped".into()))
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn scope(&self) -> Scope {
        self.inner.scope.borrow().clone()
    }

    pub fn scope_changes(&self) -> watch::Receiver<Scope> {
        self.inner.scope.subscribe()
    }

    pub fn zones(&self) -> EntityStream<Zone> {
        self.inner.reconciler.zones()
    }

    pub fn devices(&self) -> EntityStream<Device> {
        self.inner.reconciler.devices()
    }

    pub fn spaces(&self) -> EntityStream<Space> {
        self.inner.reconciler.spaces()
    }

    /// Every admitted event, control events included.
    pub fn events(&self) -> broadcast::Receiver<Arc<Event>> {
        self.inner.events_tx.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.live.subscribe()
    }

    pub fn supervisor_state(&self) -> watch::Receiver<SupervisorState> {
        self.inner.supervisor.state()
    }

    pub fn service_status(&self) -> watch::Receiver<ServiceStatus> {
        self.inner.supervisor.status()
    }

    pub fn terminal_failure(&self) -> watch::Receiver<Option<TerminalFailure>> {
        self.inner.supervisor.terminal_failure()
    }
}

impl SessionInner {
    /// `Err(ScopeMismatch)` when a result fetched under `generation` and
    /// `scope` no longer belongs to the active scope.
    fn check_current(&self, generation: u64, scope: &Scope) -> Result<(), CoreError> {
        let active = self.scope.borrow();
        if self.generation.load(Ordering::SeqCst) == generation && *active == *scope {
            Ok(())
        } else {
            Err(CoreError::ScopeMismatch {
                stale: scope.location_id.clone(),
                active: active.location_id.clone(),
            })
        }
    }

    fn apply_delivery<T: Stored>(&self, generation: u64, delivery: PollDelivery<T>) {
        if let Err(e) = self.check_current(generation, &delivery.scope) {
            debug!(error = %e, "poll result discarded");
            return;
        }
        self.reconciler.apply_snapshot(delivery.items);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn tls_mode(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Forward live messages to the merger, tagged with their origin.
async fn bridge_task(
    mut live_rx: mpsc::Receiver<LiveMessage>,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = live_rx.recv() => {
                let Some(message) = message else { break };
                let inbound = Inbound { origin: Origin::Stream, message };
                if inbound_tx.send(inbound).await.is_err() {
                    break;
                }
            }
        }
    }
}

struct Deliveries {
    zones: mpsc::Receiver<PollDelivery<Zone>>,
    devices: mpsc::Receiver<PollDelivery<Device>>,
    spaces: mpsc::Receiver<PollDelivery<Space>>,
}

/// Apply changed poll snapshots for one epoch.
async fn apply_task(
    inner: Weak<SessionInner>,
    generation: u64,
    mut rx: Deliveries,
    cancel: CancellationToken,
) {
    loop {
        let applied = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(delivery) = rx.zones.recv() => apply_weak(&inner, generation, delivery),
            Some(delivery) = rx.devices.recv() => apply_weak(&inner, generation, delivery),
            Some(delivery) = rx.spaces.recv() => apply_weak(&inner, generation, delivery),
            else => break,
        };
        if !applied {
            break;
        }
    }
}

/// `false` once the session is gone.
fn apply_weak<T: Stored>(
    inner: &Weak<SessionInner>,
    generation: u64,
    delivery: PollDelivery<T>,
) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    inner.apply_delivery(generation, delivery);
    true
}

/// Service refresh requests from the reconciler. Requests arriving within
/// `deferred_refresh_delay` of each other collapse into one refetch per
/// kind.
async fn deferred_refresh_task(
    inner: Weak<SessionInner>,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<RefreshRequest>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        debug!(kind = %first.kind, cause = %first.cause, "refresh requested");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        let mut kinds = vec![first.kind];
        while let Ok(more) = rx.try_recv() {
            if !kinds.contains(&more.kind) {
                kinds.push(more.kind);
            }
        }

        let Some(strong) = inner.upgrade() else { break };
        let session = SyncSession { inner: strong };
        let scope = session.scope();
        for kind in kinds {
            invalidate_kind(&session.inner.cache, kind, &scope);
            session.trigger_or_refresh(kind).await;
        }
    }
}
