//! Informer-backed resource caches for Kubernetes controllers.
//!
//! A [`ManagedInformerEventSource`] keeps a watch-fed local copy of one
//! resource kind and masks the watch delay for resources the controller
//! wrote itself. [`matcher`] decides whether an existing resource already
//! matches its desired state.

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod errors;
pub mod event_source;
mod informer;
pub mod informer_manager;
pub mod matcher;
mod store;
pub mod temporary_cache;
pub mod transport;
pub mod version;

mod utils;

pub use cache::Cache;
pub use errors::{CacheError, Result};
pub use event_source::{EventSourceState, ManagedInformerEventSource};
pub use informer::ResourceEventHandler;
pub use informer_manager::InformerManager;
pub use matcher::{MatchContext, MatcherRegistry, ResourceUpdaterMatcher};
pub use store::IndexFn;
pub use temporary_cache::TemporaryResourceCache;
pub use transport::{KubeWatchTransport, WatchStream, WatchTransport};

pub use rustrial_k8s_informer_cache_apis::{
    ALL_NAMESPACES, InformerConfiguration, NamespaceScope, ResourceId, WatchStatus,
};
