use crate::errors::CacheError;

use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Client, Resource,
    api::{ApiResource, DynamicObject},
};
use kube_runtime::{WatchStreamExt, watcher};
use rustrial_k8s_informer_cache_apis::InformerConfiguration;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Ordered feed of watch events of one watch (one namespace or cluster-wide).
///
/// `Init`, `InitApply` and `InitDone` delimit a full list (initial or after a
/// desync), `Apply` and `Delete` are incremental changes. Errors are transient,
/// the stream is expected to reconnect by itself.
pub type WatchStream<K> = BoxStream<'static, Result<watcher::Event<K>, CacheError>>;

/// The watch transport of one resource kind.
pub trait WatchTransport<K>: Send + Sync {
    /// Kind name of the watched resources.
    fn kind(&self) -> String;

    /// Open a watch for `namespace`, or a cluster-wide watch if `None`.
    fn watch(&self, namespace: Option<&str>) -> WatchStream<K>;
}

type ApiFactory<K> = Box<dyn Fn(Option<&str>) -> Api<K> + Send + Sync>;

/// [`WatchTransport`] backed by [`kube_runtime::watcher`] with the default
/// backoff, so reconnects and re-lists are handled by the watcher itself.
pub struct KubeWatchTransport<K> {
    kind: String,
    api: ApiFactory<K>,
    watcher_config: watcher::Config,
}

fn watcher_config(configuration: &InformerConfiguration) -> watcher::Config {
    let mut config = watcher::Config::default();
    if let Some(labels) = &configuration.label_selector {
        config = config.labels(labels.as_str());
    }
    if let Some(fields) = &configuration.field_selector {
        config = config.fields(fields.as_str());
    }
    config
}

impl<K> KubeWatchTransport<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    /// Transport for a statically typed, namespace scoped kind (e.g. `ConfigMap`).
    pub fn namespaced(client: Client, configuration: &InformerConfiguration) -> Self {
        Self {
            kind: K::kind(&Default::default()).to_string(),
            api: Box::new(move |namespace: Option<&str>| match namespace {
                Some(ns) => Api::namespaced(client.clone(), ns),
                None => Api::all(client.clone()),
            }),
            watcher_config: watcher_config(configuration),
        }
    }
}

impl KubeWatchTransport<DynamicObject> {
    /// Transport for an arbitrary kind discovered at runtime.
    pub fn dynamic(
        client: Client,
        api_resource: ApiResource,
        configuration: &InformerConfiguration,
    ) -> Self {
        Self {
            kind: api_resource.kind.clone(),
            api: Box::new(move |namespace: Option<&str>| match namespace {
                Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
                None => Api::all_with(client.clone(), &api_resource),
            }),
            watcher_config: watcher_config(configuration),
        }
    }
}

impl<K> WatchTransport<K> for KubeWatchTransport<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn kind(&self) -> String {
        self.kind.clone()
    }

    fn watch(&self, namespace: Option<&str>) -> WatchStream<K> {
        let api = (self.api)(namespace);
        watcher::watcher(api, self.watcher_config.clone())
            .default_backoff()
            .map_err(|e| CacheError::TransportDisconnected(e.to_string()))
            .boxed()
    }
}
