use crate::{cache::Cache, utils::metric_name, version};

use kube::{Resource, ResourceExt};
use opentelemetry::{
    global,
    metrics::{Counter, Meter},
};
use parking_lot::Mutex;
use rustrial_k8s_informer_cache_apis::ResourceId;
use std::{collections::HashMap, sync::Arc};
use tokio::time::{Duration, Instant};

const TEMPORARY_CACHE: &'static str = "temporary_resource_cache";

struct Entry<K> {
    resource_version: String,
    resource: Arc<K>,
    inserted_at: Instant,
}

/// Short-lived overlay of resources recently written by this controller.
///
/// An entry masks the (possibly stale) state of the informer cache until the
/// watch delivers a notification for the same resource which is at least as
/// recent, or until its time-to-live expires.
///
/// All check-then-modify sequences run under the overlay's lock. Recording a
/// write reads the informer cache while holding that lock; the watch path
/// updates the informer cache before it asks the overlay to evict. Either
/// the write sees the fresher informer state, or the eviction runs after
/// the write was recorded.
pub struct TemporaryResourceCache<K> {
    entries: Mutex<HashMap<ResourceId, Entry<K>>>,
    informer_cache: Arc<dyn Cache<K>>,
    ttl: Duration,
    eviction_count: Counter<u64>,
}

impl<K: Resource> TemporaryResourceCache<K> {
    pub fn new(informer_cache: Arc<dyn Cache<K>>, ttl: Duration) -> Self {
        let meter: Meter = global::meter(TEMPORARY_CACHE);
        let eviction_count = meter
            .u64_counter(metric_name("temporary_cache_eviction_count"))
            .with_description("Count of entries removed from the temporary resource cache")
            .build();
        Self {
            entries: Default::default(),
            informer_cache,
            ttl,
            eviction_count,
        }
    }

    fn is_expired(&self, entry: &Entry<K>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    fn evict_expired(&self, entries: &mut HashMap<ResourceId, Entry<K>>) {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !self.is_expired(e, now));
        let expired = before - entries.len();
        if expired > 0 {
            debug!("evicted {} expired entries from temporary cache", expired);
            self.eviction_count.add(expired as u64, &[]);
        }
    }

    fn insert(&self, entries: &mut HashMap<ResourceId, Entry<K>>, id: ResourceId, version: String, resource: K) {
        debug!("caching recently written resource {} with version {}", id, version);
        entries.insert(
            id,
            Entry {
                resource_version: version,
                resource: Arc::new(resource),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Record a resource created by this controller. Returns `false` if the
    /// report was not recorded because the watch already caught up with it.
    pub fn put_added_resource(&self, resource: K) -> bool {
        let id = ResourceId::from_resource(&resource);
        let Some(version) = resource.resource_version() else {
            debug!("not caching {} without resource version", id);
            return false;
        };
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries);
        if let Some(existing) = entries.get(&id) {
            if version == existing.resource_version
                || version::is_older(&version, &existing.resource_version)
            {
                debug!(
                    "ignoring stale create report {} for {}, version {} is cached",
                    version, id, existing.resource_version
                );
                return false;
            }
        }
        if let Some(observed) = self.informer_cache.get(&id) {
            let observed = observed.resource_version().unwrap_or_default();
            if !version::is_newer(&version, &observed) {
                debug!(
                    "not caching created resource {} version {}, informer already has {}",
                    id, version, observed
                );
                return false;
            }
        }
        self.insert(&mut entries, id, version, resource);
        true
    }

    /// Record a resource updated by this controller from `previous_version`.
    /// Returns `false` if the report was not recorded, either because it is
    /// older than what the overlay already holds or because the watch already
    /// delivered a state at least as recent.
    pub fn put_updated_resource(&self, resource: K, previous_version: &str) -> bool {
        let id = ResourceId::from_resource(&resource);
        let Some(version) = resource.resource_version() else {
            debug!("not caching {} without resource version", id);
            return false;
        };
        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries);
        let overlay = entries.get(&id).map(|e| e.resource_version.clone());
        if let Some(cached) = &overlay {
            if version::is_older(previous_version, cached) || version::is_older(&version, cached) {
                debug!(
                    "ignoring stale update report {} -> {} for {}, version {} is cached",
                    previous_version, version, id, cached
                );
                return false;
            }
        }
        let observed = self
            .informer_cache
            .get(&id)
            .map(|o| o.resource_version().unwrap_or_default());
        let record = match (&overlay, &observed) {
            // Chained on top of our own write which the watch has not delivered yet.
            (Some(cached), _) if cached == previous_version => true,
            // The watch has not caught up with our write yet.
            (_, Some(observed)) if observed == previous_version => true,
            (_, Some(observed)) => version::is_newer(&version, observed),
            // Not (yet) in the informer cache, only track our own prior write.
            (overlay, None) => overlay.is_some(),
        };
        if record {
            self.insert(&mut entries, id, version, resource);
        } else {
            debug!(
                "not caching updated resource {} version {}, informer has {:?}",
                id, version, observed
            );
            if entries.remove(&id).is_some() {
                self.eviction_count.add(1, &[]);
            }
        }
        record
    }

    /// The overlay entry for `id`, if present and not expired.
    pub fn get_resource_from_cache(&self, id: &ResourceId) -> Option<Arc<K>> {
        let mut entries = self.entries.lock();
        let expired = self.is_expired(entries.get(id)?, Instant::now());
        if expired {
            debug!("temporary cache entry for {} expired", id);
            entries.remove(id);
            self.eviction_count.add(1, &[]);
            return None;
        }
        entries.get(id).map(|e| e.resource.clone())
    }

    /// Called for every watch notification: removes the overlay entry unless
    /// the notification is known to be older than the overlay.
    pub fn remove_resource_from_cache(&self, resource: &K) {
        let id = ResourceId::from_resource(resource);
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(&id) else {
            return;
        };
        let notified = resource.resource_version().unwrap_or_default();
        if version::is_older(&notified, &entry.resource_version) {
            debug!(
                "keeping temporary cache entry {} version {}, notification carries older version {}",
                id, entry.resource_version, notified
            );
            return;
        }
        debug!("removing {} from temporary cache, watch delivered version {}", id, notified);
        entries.remove(&id);
        self.eviction_count.add(1, &[]);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!("dropping {} temporary cache entries", entries.len());
            self.eviction_count.add(entries.len() as u64, &[]);
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
