//! Real-time sync engine between `vigil-api` and UI consumers.
//!
//! Keeps a live, reconciled view of a location's zones, devices, and
//! spaces by combining two sources that race each other:
//!
//! - **Push**: [`LiveStreamClient`] holds one server-sent event stream,
//!   decodes frames into [`Event`]s, and reconnects forever with capped
//!   backoff. [`EventMerger`] drops repeats via a bounded
//!   [`EventDeduplicator`].
//!
//! - **Poll**: one [`SmartPoller`] per collection fetches through a TTL
//!   [`CacheStore`], reports only real changes, and stretches its interval
//!   while nothing changes.
//!
//! - **[`StateReconciler`]**: the only writer of entity state. Applies both
//!   sources per entity by recency, so neither can regress the other.
//!
//! - **[`ConnectionSupervisor`]**: keeps the platform's server-side capture
//!   service running, with bounded retries and a single de-duplicated
//!   terminal failure.
//!
//! - **[`SyncSession`]**: the facade. Owns one of everything for the active
//!   scope and tears it all down explicitly on a location switch.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod convert;
pub mod dedup;
pub mod error;
pub mod live;
pub mod model;
pub mod poller;
pub mod session;
pub mod store;
pub mod stream;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::BackoffPolicy;
pub use cache::CacheStore;
pub use config::{AuthCredentials, Scope, SyncConfig, TlsVerification};
pub use dedup::{EventDeduplicator, EventMerger, MergeOutcome, Origin};
pub use error::CoreError;
pub use live::{ConnectionState, ConnectionStatus, LiveMessage, LiveStreamClient, StreamSource};
pub use poller::{ChangeTracked, PollerConfig, PollerHandle, SmartPoller};
pub use session::SyncSession;
pub use store::{
    ApplyOutcome, EntityUpdate, RefreshRequest, SnapshotReport, StateReconciler, UpdateSource,
};
pub use stream::EntityStream;
pub use supervisor::{
    ConnectionSupervisor, ControlPlane, FailureKind, SupervisorState, TerminalFailure,
};

pub use model::{
    ArmMode, ArmedState, Device, Entity, EntityKind, EntityRef, Event, EventCategory, EventId,
    ServiceStatus, Space, Zone,
};
