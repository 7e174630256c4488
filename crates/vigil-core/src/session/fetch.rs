// ── Cache-aware resource fetches ──
//
// Pollers, manual refreshes, and detail lookups all read through the
// session cache. A mutation invalidates before the next read, never after.
// A fetch that was in flight across an invalidation predates the mutation:
// it is fetched once more and its first response is neither cached nor
// returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use vigil_api::ApiClient;

use crate::cache::{CacheStore, collection_key, entity_key, entity_prefix};
use crate::config::Scope;
use crate::error::CoreError;
use crate::model::{Device, EntityKind, Space, Zone};
use crate::store::Stored;

/// Cached values. One store serves every entity family.
#[derive(Debug, Clone)]
pub(crate) enum Cached {
    Zones(Arc<Vec<Zone>>),
    Devices(Arc<Vec<Device>>),
    Spaces(Arc<Vec<Space>>),
    Zone(Arc<Zone>),
}

pub(crate) type SessionCache = CacheStore<Cached>;

/// Entity families the session can list from the platform.
pub(crate) trait Listed: Stored {
    fn wrap(items: Arc<Vec<Self>>) -> Cached;

    fn from_cached(cached: Cached) -> Option<Arc<Vec<Self>>>;

    fn list(
        client: &ApiClient,
        location_id: &str,
    ) -> impl Future<Output = Result<Vec<Self>, CoreError>> + Send;
}

impl Listed for Zone {
    fn wrap(items: Arc<Vec<Self>>) -> Cached {
        Cached::Zones(items)
    }

    fn from_cached(cached: Cached) -> Option<Arc<Vec<Self>>> {
        match cached {
            Cached::Zones(items) => Some(items),
            _ => None,
        }
    }

    async fn list(client: &ApiClient, location_id: &str) -> Result<Vec<Self>, CoreError> {
        let entries = client.list_zones(location_id).await?;
        Ok(entries.into_iter().map(Zone::from).collect())
    }
}

impl Listed for Device {
    fn wrap(items: Arc<Vec<Self>>) -> Cached {
        Cached::Devices(items)
    }

    fn from_cached(cached: Cached) -> Option<Arc<Vec<Self>>> {
        match cached {
            Cached::Devices(items) => Some(items),
            _ => None,
        }
    }

    async fn list(client: &ApiClient, location_id: &str) -> Result<Vec<Self>, CoreError> {
        let entries = client.list_devices(location_id).await?;
        Ok(entries.into_iter().map(Device::from).collect())
    }
}

impl Listed for Space {
    fn wrap(items: Arc<Vec<Self>>) -> Cached {
        Cached::Spaces(items)
    }

    fn from_cached(cached: Cached) -> Option<Arc<Vec<Self>>> {
        match cached {
            Cached::Spaces(items) => Some(items),
            _ => None,
        }
    }

    async fn list(client: &ApiClient, location_id: &str) -> Result<Vec<Self>, CoreError> {
        let entries = client.list_spaces(location_id).await?;
        Ok(entries.into_iter().map(Space::from).collect())
    }
}

/// Serve the collection from cache, or fetch and cache it.
pub(crate) async fn list_cached<T: Listed>(
    client: &ApiClient,
    cache: &SessionCache,
    ttl: Duration,
    scope: &Scope,
) -> Result<Vec<T>, CoreError> {
    let key = collection_key(T::KIND, &scope.location_id);
    if let Some(items) = cache.get(&key).and_then(T::from_cached) {
        trace!(%key, "cache hit");
        return Ok(items.as_ref().clone());
    }

    let ticket = cache.ticket();
    let items = T::list(client, &scope.location_id).await?;
    if cache.set_if_current(key.clone(), T::wrap(Arc::new(items.clone())), ttl, ticket) {
        return Ok(items);
    }

    debug!(%key, "invalidated during fetch, refetching");
    let ticket = cache.ticket();
    let items = T::list(client, &scope.location_id).await?;
    cache.set_if_current(key, T::wrap(Arc::new(items.clone())), ttl, ticket);
    Ok(items)
}

/// Single zone, cached under its detail key.
pub(crate) async fn zone_cached(
    client: &ApiClient,
    cache: &SessionCache,
    ttl: Duration,
    scope: &Scope,
    zone_id: &str,
) -> Result<Zone, CoreError> {
    let key = entity_key(EntityKind::Zone, &scope.location_id, zone_id);
    if let Some(Cached::Zone(zone)) = cache.get(&key) {
        return Ok(zone.as_ref().clone());
    }

    let ticket = cache.ticket();
    let zone = Zone::from(client.get_zone(&scope.location_id, zone_id).await?);
    if cache.set_if_current(key.clone(), Cached::Zone(Arc::new(zone.clone())), ttl, ticket) {
        return Ok(zone);
    }

    debug!(%key, "invalidated during fetch, refetching");
    let ticket = cache.ticket();
    let zone = Zone::from(client.get_zone(&scope.location_id, zone_id).await?);
    cache.set_if_current(key, Cached::Zone(Arc::new(zone.clone())), ttl, ticket);
    Ok(zone)
}

/// Drop the collection key and every detail key for `kind` in the scope's
/// location.
pub(crate) fn invalidate_kind(cache: &SessionCache, kind: EntityKind, scope: &Scope) {
    let collection = cache.invalidate(&collection_key(kind, &scope.location_id));
    let details = cache.invalidate_prefix(&entity_prefix(kind, &scope.location_id));
    trace!(%kind, collection, details, "cache invalidated");
}
