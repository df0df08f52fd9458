use crate::{
    store::{Change, IndexFn, IndexedStore},
    transport::WatchStream,
};

use futures::StreamExt;
use kube::Resource;
use kube_runtime::watcher;
use opentelemetry::{KeyValue, metrics::Counter};
use parking_lot::{Mutex, RwLock};
use rustrial_k8s_informer_cache_apis::{ALL_NAMESPACES, ResourceId, WatchStatus};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Duration, timeout},
};

/// Receiver of add, update and delete notifications of one resource kind.
///
/// Notifications are delivered after the informer's store has been updated,
/// per watch in the order received from the transport.
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, resource: &K);

    fn on_update(&self, old: &K, new: &K);

    /// `deleted_final_state_unknown` is set if the deletion was only detected
    /// by a full re-list, in which case `resource` is the last known state.
    fn on_delete(&self, resource: &K, deleted_final_state_unknown: bool);
}

pub(crate) type Handlers<K> = Arc<RwLock<Vec<Arc<dyn ResourceEventHandler<K>>>>>;

/// Label used for a watch key in logs and health reports.
pub(crate) fn watch_key_label(key: &Option<String>) -> String {
    key.clone().unwrap_or_else(|| ALL_NAMESPACES.to_string())
}

/// One watch (a single namespace or cluster-wide) with its own store.
pub(crate) struct NamespaceInformer<K> {
    kind: String,
    key: Option<String>,
    store: Arc<RwLock<IndexedStore<K>>>,
    status: Arc<watch::Sender<WatchStatus>>,
    synced: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<K> NamespaceInformer<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(kind: &str, key: Option<String>, indexers: HashMap<String, IndexFn<K>>) -> Self {
        let (status, _) = watch::channel(WatchStatus::Starting);
        Self {
            kind: kind.to_string(),
            key,
            store: Arc::new(RwLock::new(IndexedStore::new(indexers))),
            status: Arc::new(status),
            synced: Default::default(),
            task: Mutex::new(None),
        }
    }

    pub fn label(&self) -> String {
        watch_key_label(&self.key)
    }

    pub fn store(&self) -> &RwLock<IndexedStore<K>> {
        &self.store
    }

    pub fn status(&self) -> WatchStatus {
        *self.status.borrow()
    }

    /// Whether the initial list of this watch has completed.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Spawn the routine consuming `stream`.
    pub fn start(&self, stream: WatchStream<K>, handlers: Handlers<K>, events: Counter<u64>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("watch for {} in {} is already running", self.kind, self.label());
            return;
        }
        info!("start watching {} in {}", self.kind, self.label());
        let processor = WatchProcessor {
            label: self.label(),
            store: self.store.clone(),
            status: self.status.clone(),
            synced: self.synced.clone(),
            handlers,
            events,
        };
        *task = Some(tokio::spawn(processor.run(stream)));
    }

    /// Wait until the initial list completed, `false` on timeout.
    pub async fn wait_for_sync(&self, max_wait: Duration) -> bool {
        let mut rx = self.status.subscribe();
        let synced = self.synced.clone();
        let ok = matches!(
            timeout(max_wait, rx.wait_for(move |_| synced.load(Ordering::Acquire))).await,
            Ok(Ok(_))
        );
        if !ok {
            warn!(
                "watch for {} in {} did not sync within {:?}",
                self.kind,
                self.label(),
                max_wait
            );
        }
        ok
    }

    /// Stop the watch and drop its state.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            info!("stopped watching {} in {}", self.kind, self.label());
        }
        {
            let mut store = self.store.write();
            debug!("dropping {} cached {} objects of {}", store.len(), self.kind, self.label());
            store.clear();
        }
        self.synced.store(false, Ordering::Release);
        self.status.send_replace(WatchStatus::Starting);
    }
}

struct WatchProcessor<K> {
    label: String,
    store: Arc<RwLock<IndexedStore<K>>>,
    status: Arc<watch::Sender<WatchStatus>>,
    synced: Arc<AtomicBool>,
    handlers: Handlers<K>,
    events: Counter<u64>,
}

impl<K> WatchProcessor<K>
where
    K: Resource + Send + Sync + 'static,
{
    async fn run(self, mut stream: WatchStream<K>) {
        // Objects of a full list in progress.
        let mut relist: Option<Vec<Arc<K>>> = None;
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if self.synced.load(Ordering::Acquire) {
                        self.set_status(WatchStatus::Running);
                    }
                    self.process(event, &mut relist);
                }
                Err(e) => {
                    warn!("watch in {} failed, serving last known state: {}", self.label, e);
                    self.set_status(WatchStatus::Disconnected);
                }
            }
        }
        debug!("watch stream in {} ended", self.label);
    }

    fn set_status(&self, status: WatchStatus) {
        self.status.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn process(&self, event: watcher::Event<K>, relist: &mut Option<Vec<Arc<K>>>) {
        match event {
            watcher::Event::Init => {
                debug!("full list started in {}", self.label);
                *relist = Some(Vec::new());
            }
            watcher::Event::InitApply(object) => match relist.as_mut() {
                Some(objects) => objects.push(Arc::new(object)),
                None => self.apply(Arc::new(object)),
            },
            watcher::Event::InitDone => {
                let objects = relist.take().unwrap_or_default();
                debug!("full list of {} objects completed in {}", objects.len(), self.label);
                let changes = self.store.write().replace(objects);
                self.synced.store(true, Ordering::Release);
                self.set_status(WatchStatus::Running);
                for change in changes {
                    self.dispatch(&change, true);
                }
            }
            watcher::Event::Apply(object) => self.apply(Arc::new(object)),
            watcher::Event::Delete(object) => {
                let object = Arc::new(object);
                let id = ResourceId::from_resource(object.as_ref());
                self.store.write().delete(&id);
                self.dispatch(&Change::Deleted(object), false);
            }
        }
    }

    fn apply(&self, object: Arc<K>) {
        let old = self.store.write().apply(object.clone());
        let change = match old {
            Some(old) => Change::Updated { old, new: object },
            None => Change::Added(object),
        };
        self.dispatch(&change, false);
    }

    /// Fan out a change, the store lock is not held while handlers run.
    fn dispatch(&self, change: &Change<K>, relisted: bool) {
        let handlers: Vec<Arc<dyn ResourceEventHandler<K>>> = self.handlers.read().clone();
        let event_type = match change {
            Change::Added(_) => "add",
            Change::Updated { .. } => "update",
            Change::Deleted(_) => "delete",
        };
        self.events.add(
            1,
            &[
                KeyValue::new("event", event_type),
                KeyValue::new("namespace", self.label.clone()),
            ],
        );
        for handler in handlers {
            match change {
                Change::Added(o) => handler.on_add(o),
                Change::Updated { old, new } => handler.on_update(old, new),
                Change::Deleted(o) => handler.on_delete(o, relisted),
            }
        }
    }
}
