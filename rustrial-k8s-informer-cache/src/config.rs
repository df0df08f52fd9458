use crate::{
    errors::{CacheError, Result},
    utils::env_var,
};

use rustrial_k8s_informer_cache_apis::{InformerConfiguration, NamespaceScope};
use std::{net::SocketAddr, str::FromStr};

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|v| {
            v.parse::<T>().map_err(|e| {
                CacheError::Configuration(format!("invalid value {:?} of {}: {}", v, name, e))
            })
        })
        .transpose()
}

/// Build the informer configuration from the environment.
///
/// - `WATCH_NAMESPACES`: comma separated namespaces, empty or `*` for all
/// - `LABEL_SELECTOR`, `FIELD_SELECTOR`
/// - `NAMESPACE_CHANGEABLE`: `true` or `false`
/// - `TEMPORARY_CACHE_TTL_SECS`, `SYNC_TIMEOUT_SECS`
pub fn from_env() -> Result<InformerConfiguration> {
    let mut configuration = InformerConfiguration::default();
    if let Some(namespaces) = env_var("WATCH_NAMESPACES") {
        let namespaces = NamespaceScope::from_names(namespaces.split(","));
        namespaces.validate().map_err(CacheError::Configuration)?;
        configuration.namespaces = namespaces;
    }
    configuration.label_selector = env_var("LABEL_SELECTOR");
    configuration.field_selector = env_var("FIELD_SELECTOR");
    if let Some(changeable) = parse_env::<bool>("NAMESPACE_CHANGEABLE")? {
        configuration.namespace_changeable = changeable;
    }
    if let Some(ttl) = parse_env::<u64>("TEMPORARY_CACHE_TTL_SECS")? {
        configuration.temporary_cache_ttl_secs = ttl;
    }
    if let Some(timeout) = parse_env::<u64>("SYNC_TIMEOUT_SECS")? {
        configuration.sync_timeout_secs = timeout;
    }
    Ok(configuration)
}

/// Listen address of the metrics endpoint from `METRICS_LISTEN_ADDR` and
/// `METRICS_LISTEN_PORT`, defaults to `0.0.0.0:9000`.
pub fn metrics_listen_addr() -> Result<SocketAddr> {
    let addr = env_var("METRICS_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = env_var("METRICS_LISTEN_PORT").unwrap_or_else(|| "9000".to_string());
    format!("{}:{}", addr, port)
        .parse::<SocketAddr>()
        .map_err(|e| CacheError::Configuration(format!("invalid metrics listen address: {}", e)))
}
