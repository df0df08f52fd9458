use crate::{
    cache::Cache,
    errors::{CacheError, Result},
    informer::{Handlers, NamespaceInformer, ResourceEventHandler, watch_key_label},
    store::IndexFn,
    transport::WatchTransport,
    utils::metric_name,
};

use futures::future::join_all;
use kube::Resource;
use opentelemetry::{
    global,
    metrics::{Counter, Meter},
};
use parking_lot::RwLock;
use rustrial_k8s_informer_cache_apis::{
    InformerConfiguration, NamespaceScope, ResourceId, WatchStatus,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;

const INFORMER_MANAGER: &'static str = "informer_manager";

/// Watch-fed local cache of one resource kind, with one watch per namespace
/// (or a single cluster-wide watch).
///
/// Reads are served from memory only. Every notification received from the
/// transport is applied to the store before it is handed to the registered
/// [`ResourceEventHandler`]s.
pub struct InformerManager<K> {
    kind: String,
    transport: Arc<dyn WatchTransport<K>>,
    configuration: RwLock<InformerConfiguration>,
    informers: RwLock<BTreeMap<Option<String>, Arc<NamespaceInformer<K>>>>,
    indexers: RwLock<HashMap<String, IndexFn<K>>>,
    handlers: Handlers<K>,
    /// Serializes start, stop and namespace changes; `true` while running.
    lifecycle: Mutex<bool>,
    watch_event_count: Counter<u64>,
}

impl<K> InformerManager<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(configuration: InformerConfiguration, transport: Arc<dyn WatchTransport<K>>) -> Self {
        let meter: Meter = global::meter(INFORMER_MANAGER);
        let watch_event_count = meter
            .u64_counter(metric_name("watch_event_count"))
            .with_description("Count of watch notifications applied to the informer cache")
            .build();
        Self {
            kind: transport.kind(),
            transport,
            configuration: RwLock::new(configuration),
            informers: Default::default(),
            indexers: Default::default(),
            handlers: Default::default(),
            lifecycle: Mutex::new(false),
            watch_event_count,
        }
    }

    pub fn kind(&self) -> &str {
        self.kind.as_str()
    }

    pub fn configuration(&self) -> InformerConfiguration {
        self.configuration.read().clone()
    }

    pub fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.write().push(handler);
    }

    pub async fn is_running(&self) -> bool {
        *self.lifecycle.lock().await
    }

    /// Start one watch per configured namespace and wait (bounded by the
    /// configured sync timeout) until all of them completed their initial list.
    pub async fn start(&self) {
        let mut running = self.lifecycle.lock().await;
        if *running {
            warn!("informers for {} are already running", self.kind);
            return;
        }
        let configuration = self.configuration();
        info!("starting informers for {} in {}", self.kind, configuration.namespaces);
        let started = self.start_informers(configuration.namespaces.watch_keys());
        Self::wait_for_sync(&started, &configuration).await;
        *running = true;
    }

    /// Stop all watches and drop the cached state.
    pub async fn stop(&self) {
        let mut running = self.lifecycle.lock().await;
        if !*running {
            warn!("informers for {} are not running", self.kind);
            return;
        }
        let informers = std::mem::take(&mut *self.informers.write());
        join_all(informers.values().map(|i| i.stop())).await;
        *running = false;
        info!("stopped informers for {}", self.kind);
    }

    /// Change the watched namespaces.
    ///
    /// Watches of namespaces which remain in the scope are not touched. Watches
    /// for new namespaces are started and synced before the watches of
    /// namespaces that left the scope are stopped, so there is no window in
    /// which a remaining namespace is not served.
    pub async fn change_namespaces(&self, namespaces: NamespaceScope) -> Result<()> {
        namespaces.validate().map_err(CacheError::Configuration)?;
        let running = self.lifecycle.lock().await;
        let configuration = {
            let mut configuration = self.configuration.write();
            configuration.namespaces = namespaces.clone();
            configuration.clone()
        };
        if !*running {
            debug!(
                "informers for {} not running, {} will be watched once started",
                self.kind, namespaces
            );
            return Ok(());
        }
        let desired = namespaces.watch_keys();
        let current: BTreeSet<Option<String>> = self.informers.read().keys().cloned().collect();
        let added: BTreeSet<Option<String>> = desired.difference(&current).cloned().collect();
        let removed: Vec<Option<String>> = current.difference(&desired).cloned().collect();
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }
        info!("changing namespaces of {} informers to {}", self.kind, namespaces);
        let started = self.start_informers(added);
        Self::wait_for_sync(&started, &configuration).await;
        let stopped: Vec<Arc<NamespaceInformer<K>>> = {
            let mut informers = self.informers.write();
            removed.iter().filter_map(|key| informers.remove(key)).collect()
        };
        join_all(stopped.iter().map(|i| i.stop())).await;
        Ok(())
    }

    /// Start and register informers for `keys`. Registration happens under the
    /// indexer lock, so no informer misses an indexer.
    fn start_informers(
        &self,
        keys: BTreeSet<Option<String>>,
    ) -> BTreeMap<Option<String>, Arc<NamespaceInformer<K>>> {
        let indexers = self.indexers.read();
        let started: BTreeMap<Option<String>, Arc<NamespaceInformer<K>>> = keys
            .into_iter()
            .map(|key| {
                let informer = Arc::new(NamespaceInformer::new(
                    self.kind.as_str(),
                    key.clone(),
                    indexers.clone(),
                ));
                informer.start(
                    self.transport.watch(key.as_deref()),
                    self.handlers.clone(),
                    self.watch_event_count.clone(),
                );
                (key, informer)
            })
            .collect();
        self.informers.write().extend(started.clone());
        started
    }

    async fn wait_for_sync(
        informers: &BTreeMap<Option<String>, Arc<NamespaceInformer<K>>>,
        configuration: &InformerConfiguration,
    ) {
        let timeout = configuration.sync_timeout();
        join_all(informers.values().map(|i| i.wait_for_sync(timeout))).await;
    }

    /// The informer serving reads for `namespace`: the namespace's own watch
    /// or the cluster-wide one, preferring whichever completed its initial list.
    fn informer_for(&self, namespace: Option<&str>) -> Option<Arc<NamespaceInformer<K>>> {
        let informers = self.informers.read();
        let own = namespace.and_then(|ns| informers.get(&Some(ns.to_string())));
        let cluster_wide = informers.get(&None);
        match (own, cluster_wide) {
            (Some(own), Some(cw)) if !own.has_synced() && cw.has_synced() => Some(cw.clone()),
            (Some(own), _) => Some(own.clone()),
            (None, cw) => cw.cloned(),
        }
    }

    /// The informers serving reads across all namespaces.
    fn serving_informers(&self) -> Vec<Arc<NamespaceInformer<K>>> {
        let informers = self.informers.read();
        let namespaced: Vec<Arc<NamespaceInformer<K>>> = informers
            .iter()
            .filter(|(key, _)| key.is_some())
            .map(|(_, i)| i.clone())
            .collect();
        match informers.get(&None) {
            Some(cw) if cw.has_synced() || namespaced.is_empty() => vec![cw.clone()],
            _ => namespaced,
        }
    }

    /// Register indexers with all current and future watches. Fails if one
    /// of the names is already in use.
    pub fn add_indexers(&self, indexers: HashMap<String, IndexFn<K>>) -> Result<()> {
        let mut registered = self.indexers.write();
        if let Some(name) = indexers.keys().find(|name| registered.contains_key(*name)) {
            return Err(CacheError::Configuration(format!(
                "index {} is already registered for {}",
                name, self.kind
            )));
        }
        let informers = self.informers.read();
        for (name, indexer) in indexers {
            for informer in informers.values() {
                informer.store().write().add_indexer(name.clone(), indexer.clone());
            }
            registered.insert(name, indexer);
        }
        Ok(())
    }

    /// Resources which yield `key` for index `name`.
    pub fn by_index(&self, name: &str, key: &str) -> Result<Vec<Arc<K>>> {
        if !self.indexers.read().contains_key(name) {
            return Err(CacheError::UnknownIndex(name.to_string()));
        }
        let mut result = Vec::new();
        for informer in self.serving_informers() {
            if let Some(members) = informer.store().read().by_index(name, key) {
                result.extend(members);
            }
        }
        Ok(result)
    }

    /// Status of every watch, keyed by namespace (`*` for the cluster-wide watch).
    pub fn informer_health_indicators(&self) -> BTreeMap<String, WatchStatus> {
        self.informers
            .read()
            .iter()
            .map(|(key, informer)| (watch_key_label(key), informer.status()))
            .collect()
    }

    pub fn status(&self) -> WatchStatus {
        WatchStatus::aggregate(self.informer_health_indicators().values())
    }
}

impl<K> Cache<K> for InformerManager<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn get(&self, id: &ResourceId) -> Option<Arc<K>> {
        self.informer_for(id.namespace.as_deref())
            .and_then(|informer| informer.store().read().get(id))
    }

    fn keys(&self) -> Vec<ResourceId> {
        self.serving_informers()
            .iter()
            .flat_map(|informer| informer.store().read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    fn list(&self, namespace: Option<&str>, predicate: &dyn Fn(&K) -> bool) -> Vec<Arc<K>> {
        let informers: Vec<Arc<NamespaceInformer<K>>> = match namespace {
            Some(ns) => self.informer_for(Some(ns)).into_iter().collect(),
            None => self.serving_informers(),
        };
        informers
            .iter()
            .flat_map(|informer| {
                informer
                    .store()
                    .read()
                    .list(namespace, predicate)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
