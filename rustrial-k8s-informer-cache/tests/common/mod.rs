#![allow(dead_code)]

use futures::{
    StreamExt,
    channel::mpsc::{UnboundedSender, unbounded},
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube_runtime::watcher;
use parking_lot::Mutex;
use rustrial_k8s_informer_cache::{
    CacheError, InformerConfiguration, NamespaceScope, WatchStream, WatchTransport,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::time::{Duration, Instant, sleep};

type Sender = UnboundedSender<Result<watcher::Event<ConfigMap>, CacheError>>;

/// In-memory [`WatchTransport`]: every new watch gets the primed objects of
/// its namespace as initial list, later events are pushed by the test.
#[derive(Default)]
pub struct ChannelTransport {
    watches: Mutex<HashMap<Option<String>, Vec<Sender>>>,
    primed: Mutex<HashMap<Option<String>, Vec<ConfigMap>>>,
    watch_count: Mutex<HashMap<Option<String>, usize>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Objects returned by the initial list of future watches of `namespace`.
    pub fn prime(&self, namespace: Option<&str>, objects: Vec<ConfigMap>) {
        self.primed
            .lock()
            .insert(namespace.map(|v| v.to_string()), objects);
    }

    pub fn send(&self, namespace: Option<&str>, event: Result<watcher::Event<ConfigMap>, CacheError>) {
        let key = namespace.map(|v| v.to_string());
        let mut watches = self.watches.lock();
        let senders = watches.entry(key).or_default();
        senders.retain(|s| !s.is_closed());
        assert!(!senders.is_empty(), "no active watch for {:?}", namespace);
        for sender in senders.iter() {
            let event = match &event {
                Ok(e) => Ok(e.clone()),
                Err(e) => Err(CacheError::TransportDisconnected(e.to_string())),
            };
            let _ = sender.unbounded_send(event);
        }
    }

    pub fn apply(&self, namespace: Option<&str>, object: ConfigMap) {
        self.send(namespace, Ok(watcher::Event::Apply(object)));
    }

    pub fn delete(&self, namespace: Option<&str>, object: ConfigMap) {
        self.send(namespace, Ok(watcher::Event::Delete(object)));
    }

    pub fn fail(&self, namespace: Option<&str>) {
        self.send(
            namespace,
            Err(CacheError::TransportDisconnected("connection reset".to_string())),
        );
    }

    /// A full re-list, as sent by the watcher after it reconnected.
    pub fn relist(&self, namespace: Option<&str>, objects: Vec<ConfigMap>) {
        self.send(namespace, Ok(watcher::Event::Init));
        for object in objects {
            self.send(namespace, Ok(watcher::Event::InitApply(object)));
        }
        self.send(namespace, Ok(watcher::Event::InitDone));
    }

    /// Whether a consumer is still attached to a watch of `namespace`.
    pub fn is_active(&self, namespace: Option<&str>) -> bool {
        self.watches
            .lock()
            .get(&namespace.map(|v| v.to_string()))
            .map(|senders| senders.iter().any(|s| !s.is_closed()))
            .unwrap_or(false)
    }

    /// Number of watches opened for `namespace` so far.
    pub fn watch_count(&self, namespace: Option<&str>) -> usize {
        self.watch_count
            .lock()
            .get(&namespace.map(|v| v.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

impl WatchTransport<ConfigMap> for ChannelTransport {
    fn kind(&self) -> String {
        "ConfigMap".to_string()
    }

    fn watch(&self, namespace: Option<&str>) -> WatchStream<ConfigMap> {
        let key = namespace.map(|v| v.to_string());
        let (tx, rx) = unbounded();
        let primed = self.primed.lock().get(&key).cloned().unwrap_or_default();
        let _ = tx.unbounded_send(Ok(watcher::Event::Init));
        for object in primed {
            let _ = tx.unbounded_send(Ok(watcher::Event::InitApply(object)));
        }
        let _ = tx.unbounded_send(Ok(watcher::Event::InitDone));
        *self.watch_count.lock().entry(key.clone()).or_default() += 1;
        self.watches.lock().entry(key).or_default().push(tx);
        rx.boxed()
    }
}

pub fn config_map(namespace: &str, name: &str, version: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(version.to_string()),
            uid: Some(format!("{}-{}", namespace, name)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("a".to_string(), value.to_string())])),
        ..Default::default()
    }
}

pub fn labeled(mut object: ConfigMap, app: &str) -> ConfigMap {
    object
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("app".to_string(), app.to_string());
    object
}

pub fn configuration(namespaces: &[&str]) -> InformerConfiguration {
    InformerConfiguration {
        namespaces: NamespaceScope::from_names(namespaces),
        sync_timeout_secs: 5,
        ..Default::default()
    }
}

/// Poll `condition` until it holds, `false` if it did not within two seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
