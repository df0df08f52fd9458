mod common;

use common::{ChannelTransport, config_map, configuration, eventually, labeled};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use parking_lot::Mutex;
use rustrial_k8s_informer_cache::{
    Cache, CacheError, EventSourceState, IndexFn, ManagedInformerEventSource, NamespaceScope,
    ResourceEventHandler, ResourceId, WatchStatus,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ResourceEventHandler<ConfigMap> for RecordingHandler {
    fn on_add(&self, resource: &ConfigMap) {
        self.events
            .lock()
            .push(format!("add {}", ResourceId::from_resource(resource)));
    }

    fn on_update(&self, _old: &ConfigMap, new: &ConfigMap) {
        self.events.lock().push(format!(
            "update {}@{}",
            ResourceId::from_resource(new),
            new.resource_version().unwrap_or_default()
        ));
    }

    fn on_delete(&self, resource: &ConfigMap, deleted_final_state_unknown: bool) {
        self.events.lock().push(format!(
            "delete {} {}",
            ResourceId::from_resource(resource),
            deleted_final_state_unknown
        ));
    }
}

fn by_app() -> IndexFn<ConfigMap> {
    Arc::new(|o: &ConfigMap| o.labels().get("app").cloned().into_iter().collect())
}

fn value_of(resource: Option<Arc<ConfigMap>>) -> Option<String> {
    resource.and_then(|r| r.data.as_ref().and_then(|d| d.get("a").cloned()))
}

fn version_of(resource: Option<Arc<ConfigMap>>) -> Option<String> {
    resource.and_then(|r| r.resource_version())
}

fn names(resources: Vec<Arc<ConfigMap>>) -> Vec<String> {
    let mut names: Vec<String> = resources.iter().map(|r| r.name_any()).collect();
    names.sort();
    names
}

async fn started(
    transport: &Arc<ChannelTransport>,
    namespaces: &[&str],
) -> Arc<ManagedInformerEventSource<ConfigMap>> {
    let source =
        ManagedInformerEventSource::<ConfigMap>::new(configuration(namespaces), transport.clone());
    source.start().await;
    source
}

#[tokio::test]
async fn recent_create_is_served_until_watch_delivers_it() {
    let transport = ChannelTransport::new();
    let source = started(&transport, &["default"]).await;
    let handler = Arc::new(RecordingHandler::default());
    source.add_event_handler(handler.clone());

    let id = ResourceId::namespaced("default", "x");
    let x = config_map("default", "x", "5", "1");
    assert!(source.handle_recent_resource_create(&id, x.clone()));
    assert_eq!(value_of(source.get(&id)), Some("1".to_string()));
    assert!(source.keys().is_empty());
    assert_eq!(source.temporary_cache().len(), 1);

    transport.apply(Some("default"), x);
    assert!(eventually(|| handler.events() == vec!["add default/x".to_string()]).await);
    assert!(source.temporary_cache().is_empty());
    assert_eq!(value_of(source.get(&id)), Some("1".to_string()));
    assert_eq!(source.keys(), vec![id]);
}

#[tokio::test]
async fn recent_update_masks_stale_informer_state() {
    let transport = ChannelTransport::new();
    let current = config_map("default", "x", "10", "1");
    transport.prime(Some("default"), vec![current.clone()]);
    let source = started(&transport, &["default"]).await;
    let handler = Arc::new(RecordingHandler::default());
    source.add_event_handler(handler.clone());

    let id = ResourceId::namespaced("default", "x");
    assert_eq!(version_of(source.get(&id)), Some("10".to_string()));
    let updated = config_map("default", "x", "11", "2");
    assert!(source.handle_recent_resource_update(&id, updated.clone(), &current));
    assert_eq!(value_of(source.get(&id)), Some("2".to_string()));

    // a delayed notification of the previous state does not unmask it
    transport.apply(Some("default"), current.clone());
    assert!(eventually(|| handler.events().len() == 1).await);
    assert_eq!(version_of(source.get(&id)), Some("11".to_string()));

    transport.apply(Some("default"), updated);
    assert!(eventually(|| handler.events().len() == 2).await);
    assert!(source.temporary_cache().is_empty());
    assert_eq!(version_of(source.get(&id)), Some("11".to_string()));
}

#[tokio::test]
async fn concurrent_external_write_wins_over_recent_update() {
    let transport = ChannelTransport::new();
    let current = config_map("default", "x", "10", "1");
    transport.prime(Some("default"), vec![current.clone()]);
    let source = started(&transport, &["default"]).await;
    let handler = Arc::new(RecordingHandler::default());
    source.add_event_handler(handler.clone());

    transport.apply(Some("default"), config_map("default", "x", "12", "3"));
    assert!(eventually(|| handler.events().len() == 1).await);
    let id = ResourceId::namespaced("default", "x");
    assert!(!source.handle_recent_resource_update(
        &id,
        config_map("default", "x", "11", "2"),
        &current
    ));
    assert_eq!(value_of(source.get(&id)), Some("3".to_string()));
}

#[tokio::test]
async fn notifications_are_applied_before_handlers_run() {
    let transport = ChannelTransport::new();
    transport.prime(None, vec![config_map("a", "one", "1", "1")]);
    let source = started(&transport, &[]).await;
    let handler = Arc::new(RecordingHandler::default());
    source.add_event_handler(handler.clone());

    transport.apply(None, config_map("b", "two", "2", "1"));
    transport.apply(None, config_map("a", "one", "3", "2"));
    transport.delete(None, config_map("b", "two", "4", "1"));
    assert!(eventually(|| handler.events().len() == 3).await);
    assert_eq!(
        handler.events(),
        vec![
            "add b/two".to_string(),
            "update a/one@3".to_string(),
            "delete b/two false".to_string(),
        ]
    );
    assert_eq!(source.keys(), vec![ResourceId::namespaced("a", "one")]);
    assert_eq!(names(source.list(Some("a"), &|_| true)), vec!["one"]);
    assert!(source.list(Some("b"), &|_| true).is_empty());
}

#[tokio::test]
async fn resync_replaces_state_and_reports_vanished_objects() {
    let transport = ChannelTransport::new();
    transport.prime(
        Some("default"),
        vec![
            config_map("default", "x", "1", "1"),
            config_map("default", "y", "1", "1"),
        ],
    );
    let source = started(&transport, &["default"]).await;
    let handler = Arc::new(RecordingHandler::default());
    source.add_event_handler(handler.clone());

    transport.fail(Some("default"));
    assert!(eventually(|| source.status() == WatchStatus::Disconnected).await);
    // last known state is still served
    assert_eq!(source.keys().len(), 2);

    transport.relist(
        Some("default"),
        vec![
            config_map("default", "x", "1", "1"),
            config_map("default", "z", "7", "1"),
        ],
    );
    assert!(eventually(|| handler.events().len() == 2).await);
    let mut events = handler.events();
    events.sort();
    assert_eq!(
        events,
        vec!["add default/z".to_string(), "delete default/y true".to_string()]
    );
    assert_eq!(source.status(), WatchStatus::Running);
    assert_eq!(names(source.list_all(&|_| true)), vec!["x", "z"]);
}

#[tokio::test]
async fn index_follows_notifications() {
    let transport = ChannelTransport::new();
    transport.prime(
        Some("default"),
        vec![
            labeled(config_map("default", "x", "1", "1"), "web"),
            labeled(config_map("default", "y", "1", "1"), "db"),
        ],
    );
    let source =
        ManagedInformerEventSource::<ConfigMap>::new(configuration(&["default"]), transport.clone());
    source
        .add_indexers(HashMap::from([("app".to_string(), by_app())]))
        .unwrap();
    source.start().await;
    let handler = Arc::new(RecordingHandler::default());
    source.add_event_handler(handler.clone());

    assert_eq!(names(source.by_index("app", "web").unwrap()), vec!["x"]);
    transport.apply(
        Some("default"),
        labeled(config_map("default", "y", "2", "1"), "web"),
    );
    transport.apply(
        Some("default"),
        labeled(config_map("default", "z", "3", "1"), "db"),
    );
    transport.delete(Some("default"), config_map("default", "x", "4", "1"));
    assert!(eventually(|| handler.events().len() == 3).await);
    assert_eq!(names(source.by_index("app", "web").unwrap()), vec!["y"]);
    assert_eq!(names(source.by_index("app", "db").unwrap()), vec!["z"]);
    assert!(source.by_index("app", "cache").unwrap().is_empty());
}

#[tokio::test]
async fn index_added_after_start_covers_cached_objects() {
    let transport = ChannelTransport::new();
    transport.prime(
        Some("default"),
        vec![labeled(config_map("default", "x", "1", "1"), "web")],
    );
    let source = started(&transport, &["default"]).await;
    source
        .add_indexers(HashMap::from([("app".to_string(), by_app())]))
        .unwrap();
    assert_eq!(names(source.by_index("app", "web").unwrap()), vec!["x"]);
}

#[tokio::test]
async fn index_misuse_is_reported() {
    let transport = ChannelTransport::new();
    let source = started(&transport, &["default"]).await;
    assert!(matches!(
        source.by_index("app", "web"),
        Err(CacheError::UnknownIndex(name)) if name == "app"
    ));
    source
        .add_indexers(HashMap::from([("app".to_string(), by_app())]))
        .unwrap();
    assert!(matches!(
        source.add_indexers(HashMap::from([("app".to_string(), by_app())])),
        Err(CacheError::Configuration(_))
    ));
}

#[tokio::test]
async fn change_namespaces_keeps_remaining_watches() {
    let transport = ChannelTransport::new();
    transport.prime(Some("a"), vec![config_map("a", "one", "1", "1")]);
    transport.prime(Some("b"), vec![config_map("b", "two", "2", "1")]);
    transport.prime(Some("c"), vec![config_map("c", "three", "3", "1")]);
    let source = started(&transport, &["a", "b"]).await;
    assert_eq!(names(source.list_all(&|_| true)), vec!["one", "two"]);

    source
        .change_namespaces(NamespaceScope::from_names(["b", "c"]))
        .await
        .unwrap();
    assert_eq!(names(source.list_all(&|_| true)), vec!["three", "two"]);
    assert!(source.get(&ResourceId::namespaced("a", "one")).is_none());
    assert!(source.get(&ResourceId::namespaced("b", "two")).is_some());
    assert_eq!(transport.watch_count(Some("b")), 1);
    assert!(eventually(|| !transport.is_active(Some("a"))).await);
    assert!(transport.is_active(Some("b")));
    assert!(transport.is_active(Some("c")));
    assert_eq!(
        source.informer_health_indicators(),
        BTreeMap::from([
            ("b".to_string(), WatchStatus::Running),
            ("c".to_string(), WatchStatus::Running),
        ])
    );
    assert_eq!(
        source.configuration().namespaces,
        NamespaceScope::from_names(["b", "c"])
    );
}

#[tokio::test]
async fn change_to_all_namespaces_and_back() {
    let transport = ChannelTransport::new();
    transport.prime(Some("a"), vec![config_map("a", "one", "1", "1")]);
    transport.prime(
        None,
        vec![
            config_map("a", "one", "1", "1"),
            config_map("b", "two", "2", "1"),
        ],
    );
    let source = started(&transport, &["a"]).await;
    source
        .change_namespaces(NamespaceScope::AllNamespaces)
        .await
        .unwrap();
    assert_eq!(names(source.list_all(&|_| true)), vec!["one", "two"]);
    assert!(eventually(|| !transport.is_active(Some("a"))).await);

    source
        .change_namespaces(NamespaceScope::from_names(["a"]))
        .await
        .unwrap();
    assert_eq!(names(source.list_all(&|_| true)), vec!["one"]);
    assert!(eventually(|| !transport.is_active(None)).await);
}

#[tokio::test]
async fn invalid_namespaces_are_rejected() {
    let transport = ChannelTransport::new();
    let source = started(&transport, &["a"]).await;
    let result = source
        .change_namespaces(NamespaceScope::from_names(["Not_Valid"]))
        .await;
    assert!(matches!(result, Err(CacheError::Configuration(_))));
    assert_eq!(
        source.configuration().namespaces,
        NamespaceScope::from_names(["a"])
    );
}

#[tokio::test]
async fn fixed_namespaces_ignore_changes() {
    let transport = ChannelTransport::new();
    let mut config = configuration(&["a"]);
    config.namespace_changeable = false;
    let source = ManagedInformerEventSource::<ConfigMap>::new(config, transport.clone());
    source.start().await;
    source
        .change_namespaces(NamespaceScope::from_names(["b"]))
        .await
        .unwrap();
    assert_eq!(transport.watch_count(Some("b")), 0);
    assert!(transport.is_active(Some("a")));
}

#[tokio::test]
async fn watch_failures_are_reported_as_health() {
    let transport = ChannelTransport::new();
    transport.prime(Some("default"), vec![config_map("default", "x", "1", "1")]);
    let source = ManagedInformerEventSource::<ConfigMap>::new(
        configuration(&["default"]),
        transport.clone(),
    );
    assert_eq!(source.status(), WatchStatus::Starting);
    source.start().await;
    assert_eq!(source.status(), WatchStatus::Running);

    transport.fail(Some("default"));
    assert!(eventually(|| source.status() == WatchStatus::Disconnected).await);
    assert_eq!(
        source.informer_health_indicators().get("default"),
        Some(&WatchStatus::Disconnected)
    );
    let id = ResourceId::namespaced("default", "x");
    assert!(source.get(&id).is_some());

    transport.apply(Some("default"), config_map("default", "x", "2", "2"));
    assert!(eventually(|| source.status() == WatchStatus::Running).await);
    assert!(eventually(|| value_of(source.get(&id)) == Some("2".to_string())).await);
}

#[tokio::test]
async fn lifecycle_is_idempotent() {
    let transport = ChannelTransport::new();
    transport.prime(Some("default"), vec![config_map("default", "x", "1", "1")]);
    let source = ManagedInformerEventSource::<ConfigMap>::new(
        configuration(&["default"]),
        transport.clone(),
    );
    assert_eq!(source.state(), EventSourceState::Created);
    // stop without start is a no-op
    source.stop().await;
    assert_eq!(source.state(), EventSourceState::Created);

    source.start().await;
    source.start().await;
    assert_eq!(source.state(), EventSourceState::Running);
    assert_eq!(transport.watch_count(Some("default")), 1);

    let id = ResourceId::namespaced("default", "y");
    assert!(source.handle_recent_resource_create(&id, config_map("default", "y", "2", "1")));
    assert_eq!(source.temporary_cache().len(), 1);

    source.stop().await;
    source.stop().await;
    assert_eq!(source.state(), EventSourceState::Stopped);
    assert!(source.keys().is_empty());
    assert!(source.temporary_cache().is_empty());
    assert!(source.get(&id).is_none());
    assert!(eventually(|| !transport.is_active(Some("default"))).await);

    // a stopped event source stays stopped
    source.start().await;
    assert_eq!(source.state(), EventSourceState::Stopped);
    assert_eq!(transport.watch_count(Some("default")), 1);
    assert_eq!(source.to_string(), "ManagedInformerEventSource{kind: ConfigMap}");
}
