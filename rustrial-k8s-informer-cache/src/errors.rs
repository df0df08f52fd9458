#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// Misuse of the cache configuration, e.g. registering an index name twice
    /// or requesting an invalid set of namespaces to watch.
    #[error("{0}")]
    Configuration(String),
    /// Lookup against an index name which was never registered.
    #[error("index {0} is not registered")]
    UnknownIndex(String),
    /// The watch stream failed. This is recovered internally by reconnecting
    /// and resyncing and is only ever surfaced as a health status transition.
    #[error("{0}")]
    TransportDisconnected(String),
    /// Kubernetes API error
    #[error("{0}")]
    KubeApi(#[from] kube::Error),
    /// Serialization errors
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl CacheError {
    pub fn is_temporary(&self) -> bool {
        match self {
            CacheError::TransportDisconnected(_) | CacheError::KubeApi(_) => true,
            _ => false,
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
