//! Per-kind logic deciding whether an existing resource already matches the
//! desired state, and producing the update payload if it does not.

use crate::errors::Result;

use json_patch::{Patch, diff};
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use kube::{Resource, api::DynamicObject};
use serde::Serialize;
use std::{any::Any, collections::HashMap, sync::Arc};

mod config_map;
mod generic;
mod service_account;

pub use config_map::ConfigMapMatcher;
pub use generic::GenericMatcher;
pub use service_account::ServiceAccountMatcher;

/// Caller supplied options of a match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchContext {
    /// Also compare labels and annotations of the desired state, only used
    /// by matchers which do not know the controlled fields of a kind.
    pub consider_metadata: bool,
}

/// Compares and merges the fields a desired resource controls.
///
/// Implementations must only look at (and only copy) the fields controlled
/// by the desired state of their kind, so that server assigned fields never
/// cause an update nor get overwritten by one.
pub trait ResourceUpdaterMatcher<K>: Send + Sync {
    /// Whether `actual` already has all fields controlled by `desired`.
    fn matches(&self, actual: &K, desired: &K, context: &MatchContext) -> bool;

    /// Overwrite the fields controlled by `desired` in `actual`, which is a
    /// copy of the observed resource.
    fn update_cloned_actual(&self, actual: &mut K, desired: &K);

    /// The observed resource with the desired fields applied.
    fn updated_resource(&self, actual: &K, desired: &K) -> K
    where
        K: Clone,
    {
        let mut updated = actual.clone();
        self.update_cloned_actual(&mut updated, desired);
        updated
    }
}

/// JSON patch turning `actual` into the updated resource, `None` if applying
/// `desired` does not change anything.
pub fn update_patch<K, M>(matcher: &M, actual: &K, desired: &K) -> Result<Option<Patch>>
where
    K: Clone + Serialize,
    M: ResourceUpdaterMatcher<K> + ?Sized,
{
    let updated = matcher.updated_resource(actual, desired);
    let patch = diff(&serde_json::to_value(actual)?, &serde_json::to_value(&updated)?);
    if patch.0.is_empty() {
        Ok(None)
    } else {
        Ok(Some(patch))
    }
}

/// Matchers keyed by kind name.
#[derive(Default)]
pub struct MatcherRegistry {
    matchers: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl MatcherRegistry {
    /// Registry with the built-in matchers for `ConfigMap` and `ServiceAccount`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register::<ConfigMap>(Arc::new(ConfigMapMatcher));
        registry.register::<ServiceAccount>(Arc::new(ServiceAccountMatcher));
        registry
    }

    /// Register `matcher` for the static kind of `K`, replacing a previously
    /// registered one.
    pub fn register<K>(&mut self, matcher: Arc<dyn ResourceUpdaterMatcher<K>>)
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        self.register_kind(&K::kind(&()), matcher);
    }

    pub fn register_kind<K: 'static>(&mut self, kind: &str, matcher: Arc<dyn ResourceUpdaterMatcher<K>>) {
        if self.matchers.insert(kind.to_string(), Box::new(matcher)).is_some() {
            debug!("replaced matcher for {}", kind);
        }
    }

    /// The matcher registered for `kind`, if it matches resources of type `K`.
    pub fn get<K: 'static>(&self, kind: &str) -> Option<Arc<dyn ResourceUpdaterMatcher<K>>> {
        self.matchers
            .get(kind)?
            .downcast_ref::<Arc<dyn ResourceUpdaterMatcher<K>>>()
            .cloned()
    }

    pub fn for_kind<K>(&self) -> Option<Arc<dyn ResourceUpdaterMatcher<K>>>
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        self.get::<K>(&K::kind(&()))
    }

    /// The matcher for untyped resources of `kind`, falling back to the
    /// [`GenericMatcher`].
    pub fn dynamic(&self, kind: &str) -> Arc<dyn ResourceUpdaterMatcher<DynamicObject>> {
        self.get::<DynamicObject>(kind)
            .unwrap_or_else(|| Arc::new(GenericMatcher))
    }
}
