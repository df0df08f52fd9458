use std::{collections::BTreeSet, fmt, time::Duration};

use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Namespace entry which stands for "all namespaces", used both in configuration
/// values (e.g. `WATCH_NAMESPACES=*`) and as key of the cluster-wide watch in
/// health reports.
pub const ALL_NAMESPACES: &'static str = "*";

/// Uniquely identifies a tracked object of a known kind by namespace and name.
///
/// This is the sole key used by all caches.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ResourceId {
    /// The object's namespace, `None` for cluster scoped objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The object's name (`metadata.name`).
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(|v| v.to_string()),
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    pub fn from_resource<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.namespace(),
            name: resource.name_any(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl<K: Resource> From<&K> for ResourceId {
    fn from(o: &K) -> Self {
        Self::from_resource(o)
    }
}

/// The set of namespaces an informer watches.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum NamespaceScope {
    /// One cluster-wide watch.
    AllNamespaces,
    /// One watch per namespace.
    Namespaces(BTreeSet<String>),
}

impl Default for NamespaceScope {
    fn default() -> Self {
        Self::AllNamespaces
    }
}

impl NamespaceScope {
    /// Build a scope from a list of namespace names. An empty list, or a list
    /// containing `"*"` or `""`, selects all namespaces.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .collect();
        if names.is_empty() || names.contains(ALL_NAMESPACES) || names.contains("") {
            Self::AllNamespaces
        } else {
            Self::Namespaces(names)
        }
    }

    pub fn is_all_namespaces(&self) -> bool {
        matches!(self, Self::AllNamespaces)
    }

    /// The watch keys of this scope, `None` being the cluster-wide watch.
    pub fn watch_keys(&self) -> BTreeSet<Option<String>> {
        match self {
            Self::AllNamespaces => BTreeSet::from([None]),
            Self::Namespaces(names) => names.iter().map(|v| Some(v.clone())).collect(),
        }
    }

    /// Check that all explicitly listed namespaces are valid RFC 1123 labels.
    pub fn validate(&self) -> Result<(), String> {
        if let Self::Namespaces(names) = self {
            for name in names {
                if !is_rfc1123_label(name) {
                    return Err(format!(
                        "namespace {:?} is not a valid RFC 1123 label",
                        name
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_rfc1123_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

impl From<Vec<String>> for NamespaceScope {
    fn from(v: Vec<String>) -> Self {
        Self::from_names(v)
    }
}

impl From<NamespaceScope> for Vec<String> {
    fn from(v: NamespaceScope) -> Self {
        match v {
            NamespaceScope::AllNamespaces => vec![ALL_NAMESPACES.to_string()],
            NamespaceScope::Namespaces(names) => names.into_iter().collect(),
        }
    }
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllNamespaces => write!(f, "all namespaces"),
            Self::Namespaces(names) => {
                let names: Vec<&str> = names.iter().map(|v| v.as_str()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

/// Connection status of a single watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum WatchStatus {
    /// The watch was started but has not yet completed its initial list.
    Starting,
    /// The watch is connected and the local cache is in sync.
    Running,
    /// The watch stream failed, the last known state is still served while
    /// the transport reconnects.
    Disconnected,
}

impl WatchStatus {
    /// Aggregate the status of several watches: running only if all of them
    /// are running, disconnected as soon as one of them is.
    pub fn aggregate<'a, I: IntoIterator<Item = &'a WatchStatus>>(statuses: I) -> WatchStatus {
        let mut any = false;
        let mut all_running = true;
        for status in statuses {
            any = true;
            match status {
                WatchStatus::Disconnected => return WatchStatus::Disconnected,
                WatchStatus::Starting => all_running = false,
                WatchStatus::Running => (),
            }
        }
        if any && all_running {
            WatchStatus::Running
        } else {
            WatchStatus::Starting
        }
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchStatus::Starting => "Starting",
            WatchStatus::Running => "Running",
            WatchStatus::Disconnected => "Disconnected",
        };
        f.write_str(s)
    }
}

/// Informer configuration of a managed event source.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InformerConfiguration {
    /// The namespaces to watch, defaults to all namespaces.
    pub namespaces: NamespaceScope,
    /// Whether the watched namespaces may be changed at runtime. If `false`,
    /// namespace change requests are ignored.
    pub namespace_changeable: bool,
    /// Optional label selector passed on to the watch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    /// Optional field selector passed on to the watch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<String>,
    /// Time-to-live of recently written resources in the temporary cache.
    pub temporary_cache_ttl_secs: u64,
    /// Maximum time to wait for the initial list of a watch.
    pub sync_timeout_secs: u64,
}

impl Default for InformerConfiguration {
    fn default() -> Self {
        Self {
            namespaces: NamespaceScope::AllNamespaces,
            namespace_changeable: true,
            label_selector: None,
            field_selector: None,
            temporary_cache_ttl_secs: 60,
            sync_timeout_secs: 120,
        }
    }
}

impl InformerConfiguration {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn temporary_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.temporary_cache_ttl_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}
