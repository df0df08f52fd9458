use kube::{Resource, ResourceExt};
use rustrial_k8s_informer_cache_apis::ResourceId;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Extraction function of an index, a resource may yield zero, one or many keys.
pub type IndexFn<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// A change of the store content, as reported to event handlers.
#[derive(Debug, Clone)]
pub(crate) enum Change<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

/// Local state of one watch: the last observed object per [`ResourceId`]
/// plus all registered indices.
///
/// Index content is always derived from the current objects and updated
/// together with them.
pub(crate) struct IndexedStore<K> {
    objects: HashMap<ResourceId, Arc<K>>,
    indexers: HashMap<String, IndexFn<K>>,
    /// index name -> index key -> object ids
    indices: HashMap<String, HashMap<String, HashSet<ResourceId>>>,
}

impl<K: Resource> IndexedStore<K> {
    pub fn new(indexers: HashMap<String, IndexFn<K>>) -> Self {
        let indices = indexers
            .keys()
            .map(|name| (name.clone(), HashMap::new()))
            .collect();
        Self {
            objects: Default::default(),
            indexers,
            indices,
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<K>> {
        self.objects.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceId> {
        self.objects.keys()
    }

    pub fn list<'a, P>(&'a self, namespace: Option<&'a str>, predicate: P) -> impl Iterator<Item = Arc<K>> + 'a
    where
        P: Fn(&K) -> bool + 'a,
    {
        self.objects
            .iter()
            .filter(move |(id, _)| namespace.map_or(true, |ns| id.namespace.as_deref() == Some(ns)))
            .filter(move |(_, o)| predicate(o))
            .map(|(_, o)| o.clone())
    }

    /// Current members of `key` in index `name`, `None` if the index is unknown.
    pub fn by_index(&self, name: &str, key: &str) -> Option<Vec<Arc<K>>> {
        let index = self.indices.get(name)?;
        Some(
            index
                .get(key)
                .map(|ids| ids.iter().filter_map(|id| self.objects.get(id).cloned()).collect())
                .unwrap_or_default(),
        )
    }

    /// Register an indexer and build its index from the current objects.
    pub fn add_indexer(&mut self, name: String, indexer: IndexFn<K>) {
        let mut index: HashMap<String, HashSet<ResourceId>> = HashMap::new();
        for (id, o) in self.objects.iter() {
            for key in indexer(o) {
                index.entry(key).or_default().insert(id.clone());
            }
        }
        self.indices.insert(name.clone(), index);
        self.indexers.insert(name, indexer);
    }

    /// Insert or replace an object, returning the previous state.
    pub fn apply(&mut self, object: Arc<K>) -> Option<Arc<K>> {
        let id = ResourceId::from_resource(object.as_ref());
        let old = self.objects.insert(id.clone(), object.clone());
        if let Some(old) = &old {
            self.unindex(&id, old);
        }
        self.index(&id, &object);
        old
    }

    pub fn delete(&mut self, id: &ResourceId) -> Option<Arc<K>> {
        let old = self.objects.remove(id);
        if let Some(old) = &old {
            self.unindex(id, old);
        }
        old
    }

    /// Replace the whole content with the result of a full list and return
    /// the changes. Objects whose resource version did not change are not
    /// reported.
    pub fn replace(&mut self, objects: Vec<Arc<K>>) -> Vec<Change<K>> {
        let mut changes = Vec::with_capacity(objects.len());
        let mut remaining: HashSet<ResourceId> = self.objects.keys().cloned().collect();
        for object in objects {
            let id = ResourceId::from_resource(object.as_ref());
            remaining.remove(&id);
            match self.apply(object.clone()) {
                None => changes.push(Change::Added(object)),
                Some(old) if old.resource_version() != object.resource_version() => {
                    changes.push(Change::Updated { old, new: object })
                }
                Some(_) => (),
            }
        }
        for id in remaining {
            if let Some(old) = self.delete(&id) {
                changes.push(Change::Deleted(old));
            }
        }
        changes
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        for index in self.indices.values_mut() {
            index.clear();
        }
    }

    fn index(&mut self, id: &ResourceId, object: &K) {
        for (name, indexer) in self.indexers.iter() {
            let index = self.indices.entry(name.clone()).or_default();
            for key in indexer(object) {
                index.entry(key).or_default().insert(id.clone());
            }
        }
    }

    fn unindex(&mut self, id: &ResourceId, object: &K) {
        for (name, indexer) in self.indexers.iter() {
            if let Some(index) = self.indices.get_mut(name) {
                for key in indexer(object) {
                    if let Some(ids) = index.get_mut(&key) {
                        ids.remove(id);
                        if ids.is_empty() {
                            index.remove(&key);
                        }
                    }
                }
            }
        }
    }
}
