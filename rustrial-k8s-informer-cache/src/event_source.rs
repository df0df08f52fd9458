use crate::{
    cache::Cache,
    errors::Result,
    informer::ResourceEventHandler,
    informer_manager::InformerManager,
    store::IndexFn,
    temporary_cache::TemporaryResourceCache,
    transport::WatchTransport,
    utils::metric_name,
};

use kube::{Resource, ResourceExt};
use opentelemetry::{
    global,
    metrics::{Counter, Meter},
};
use parking_lot::Mutex;
use rustrial_k8s_informer_cache_apis::{
    InformerConfiguration, NamespaceScope, ResourceId, WatchStatus,
};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Weak},
};

const EVENT_SOURCE: &'static str = "managed_informer_event_source";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSourceState {
    Created,
    Running,
    Stopped,
}

/// The single entry point of a reconciler for one resource kind.
///
/// Combines the watch-fed [`InformerManager`] with a
/// [`TemporaryResourceCache`] of the controller's own recent writes, so
/// that a resource read right after it was written reflects that write even
/// if the watch has not delivered it yet.
pub struct ManagedInformerEventSource<K> {
    manager: Arc<InformerManager<K>>,
    temporary_cache: TemporaryResourceCache<K>,
    state: Mutex<EventSourceState>,
    temporary_cache_hits: Counter<u64>,
    informer_reads: Counter<u64>,
}

/// Forwards watch notifications to the event source without keeping it alive.
struct EventSourceHandler<K>(Weak<ManagedInformerEventSource<K>>);

impl<K> ResourceEventHandler<K> for EventSourceHandler<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn on_add(&self, resource: &K) {
        if let Some(source) = self.0.upgrade() {
            source.on_add(resource);
        }
    }

    fn on_update(&self, old: &K, new: &K) {
        if let Some(source) = self.0.upgrade() {
            source.on_update(old, new);
        }
    }

    fn on_delete(&self, resource: &K, deleted_final_state_unknown: bool) {
        if let Some(source) = self.0.upgrade() {
            source.on_delete(resource, deleted_final_state_unknown);
        }
    }
}

impl<K> ManagedInformerEventSource<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(
        configuration: InformerConfiguration,
        transport: Arc<dyn WatchTransport<K>>,
    ) -> Arc<Self> {
        let ttl = configuration.temporary_cache_ttl();
        let meter: Meter = global::meter(EVENT_SOURCE);
        let temporary_cache_hits = meter
            .u64_counter(metric_name("temporary_cache_hit_count"))
            .with_description("Count of reads served from the temporary resource cache")
            .build();
        let informer_reads = meter
            .u64_counter(metric_name("informer_read_count"))
            .with_description("Count of reads served from the informer cache")
            .build();
        Arc::new_cyclic(|source: &Weak<Self>| {
            let manager = Arc::new(InformerManager::new(configuration, transport));
            // Registered first, so the overlay is evicted before any other
            // handler sees the notification.
            manager.add_event_handler(Arc::new(EventSourceHandler(source.clone())));
            let informer_cache: Arc<dyn Cache<K>> = manager.clone();
            Self {
                temporary_cache: TemporaryResourceCache::new(informer_cache, ttl),
                manager,
                state: Mutex::new(EventSourceState::Created),
                temporary_cache_hits,
                informer_reads,
            }
        })
    }

    pub fn kind(&self) -> &str {
        self.manager.kind()
    }

    pub fn state(&self) -> EventSourceState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EventSourceState::Running
    }

    pub fn configuration(&self) -> InformerConfiguration {
        self.manager.configuration()
    }

    pub fn temporary_cache(&self) -> &TemporaryResourceCache<K> {
        &self.temporary_cache
    }

    /// Start the informers and wait for their initial list, then accept
    /// notifications. A stopped event source cannot be started again.
    pub async fn start(&self) {
        match self.state() {
            EventSourceState::Created => {}
            EventSourceState::Running => {
                warn!("{} is already running", self);
                return;
            }
            EventSourceState::Stopped => {
                warn!("{} was stopped and cannot be restarted", self);
                return;
            }
        }
        self.manager.start().await;
        *self.state.lock() = EventSourceState::Running;
        info!("{} started", self);
    }

    /// Stop accepting notifications, drop the overlay, then stop the
    /// informers.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != EventSourceState::Running {
                warn!("{} is not running", self);
                return;
            }
            *state = EventSourceState::Stopped;
        }
        self.temporary_cache.clear();
        self.manager.stop().await;
        info!("{} stopped", self);
    }

    /// Change the watched namespaces. Ignored if the configuration does not
    /// allow namespace changes.
    pub async fn change_namespaces(&self, namespaces: NamespaceScope) -> Result<()> {
        if !self.configuration().namespace_changeable {
            debug!(
                "{} does not allow namespace changes, ignoring change to {}",
                self, namespaces
            );
            return Ok(());
        }
        self.manager.change_namespaces(namespaces).await
    }

    /// Report a resource which this controller just created.
    pub fn handle_recent_resource_create(&self, id: &ResourceId, resource: K) -> bool {
        debug!("recent create of {} reported to {}", id, self);
        self.temporary_cache.put_added_resource(resource)
    }

    /// Report a resource which this controller just updated from `previous`.
    pub fn handle_recent_resource_update(&self, id: &ResourceId, resource: K, previous: &K) -> bool {
        debug!("recent update of {} reported to {}", id, self);
        let previous_version = previous.resource_version().unwrap_or_default();
        self.temporary_cache
            .put_updated_resource(resource, previous_version.as_str())
    }

    pub fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.manager.add_event_handler(handler);
    }

    pub fn add_indexers(&self, indexers: HashMap<String, IndexFn<K>>) -> Result<()> {
        self.manager.add_indexers(indexers)
    }

    pub fn by_index(&self, name: &str, key: &str) -> Result<Vec<Arc<K>>> {
        self.manager.by_index(name, key)
    }

    pub fn informer_health_indicators(&self) -> BTreeMap<String, WatchStatus> {
        self.manager.informer_health_indicators()
    }

    pub fn status(&self) -> WatchStatus {
        self.manager.status()
    }

    fn evict(&self, resource: &K) {
        if self.state() == EventSourceState::Stopped {
            debug!(
                "{} is stopped, ignoring notification for {}",
                self,
                ResourceId::from_resource(resource)
            );
            return;
        }
        self.temporary_cache.remove_resource_from_cache(resource);
    }
}

impl<K> ResourceEventHandler<K> for ManagedInformerEventSource<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn on_add(&self, resource: &K) {
        self.evict(resource);
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.evict(new);
    }

    fn on_delete(&self, resource: &K, _deleted_final_state_unknown: bool) {
        self.evict(resource);
    }
}

impl<K> Cache<K> for ManagedInformerEventSource<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// The overlay entry of a recent write if there is one, the informer's
    /// state otherwise.
    fn get(&self, id: &ResourceId) -> Option<Arc<K>> {
        if let Some(resource) = self.temporary_cache.get_resource_from_cache(id) {
            debug!("resource {} found in temporary cache", id);
            self.temporary_cache_hits.add(1, &[]);
            return Some(resource);
        }
        debug!("resource {} not in temporary cache, reading informer cache", id);
        self.informer_reads.add(1, &[]);
        let resource = self.manager.get(id);
        debug!("resource {} found in informer cache: {}", id, resource.is_some());
        resource
    }

    fn keys(&self) -> Vec<ResourceId> {
        self.manager.keys()
    }

    fn list(&self, namespace: Option<&str>, predicate: &dyn Fn(&K) -> bool) -> Vec<Arc<K>> {
        self.manager.list(namespace, predicate)
    }
}

impl<K> fmt::Display for ManagedInformerEventSource<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedInformerEventSource{{kind: {}}}", self.kind())
    }
}
