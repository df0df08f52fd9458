use rustrial_k8s_informer_cache_apis::ResourceId;
use std::sync::Arc;

/// Read access to locally cached resources of one kind.
pub trait Cache<K>: Send + Sync {
    /// Last known state of the resource identified by `id`.
    fn get(&self, id: &ResourceId) -> Option<Arc<K>>;

    fn contains(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }

    fn keys(&self) -> Vec<ResourceId>;

    /// All cached resources in `namespace` (or in all namespaces if `None`)
    /// for which `predicate` holds. The result is a snapshot taken at call time.
    fn list(&self, namespace: Option<&str>, predicate: &dyn Fn(&K) -> bool) -> Vec<Arc<K>>;

    fn list_all(&self, predicate: &dyn Fn(&K) -> bool) -> Vec<Arc<K>> {
        self.list(None, predicate)
    }
}
