#[macro_use]
extern crate log;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Client, ResourceExt};
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use prometheus_exporter::start_prometheus_metrics_server;
use rustrial_k8s_informer_cache::{
    IndexFn, KubeWatchTransport, ManagedInformerEventSource, ResourceEventHandler, ResourceId,
    config,
};
use std::{collections::HashMap, sync::Arc};
use tokio::time::{Duration, interval};

mod prometheus_exporter;

/// Label indexed by the [`APP_INDEX`] index.
const APP_LABEL: &'static str = "app.kubernetes.io/name";

const APP_INDEX: &'static str = "app";

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

struct LoggingHandler;

impl ResourceEventHandler<ConfigMap> for LoggingHandler {
    fn on_add(&self, resource: &ConfigMap) {
        debug!("ConfigMap {} added", ResourceId::from_resource(resource));
    }

    fn on_update(&self, _old: &ConfigMap, new: &ConfigMap) {
        debug!(
            "ConfigMap {} updated to version {}",
            ResourceId::from_resource(new),
            new.resource_version().unwrap_or_default()
        );
    }

    fn on_delete(&self, resource: &ConfigMap, deleted_final_state_unknown: bool) {
        debug!(
            "ConfigMap {} deleted (final state unknown: {})",
            ResourceId::from_resource(resource),
            deleted_final_state_unknown
        );
    }
}

fn app_indexer() -> IndexFn<ConfigMap> {
    Arc::new(|cm: &ConfigMap| cm.labels().get(APP_LABEL).cloned().into_iter().collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
    let metrics_addr = config::metrics_listen_addr()?;
    let registry = Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider.clone());

    let configuration = config::from_env()?;
    let client = Client::try_default().await?;
    let transport = Arc::new(KubeWatchTransport::<ConfigMap>::namespaced(
        client,
        &configuration,
    ));
    let event_source = ManagedInformerEventSource::<ConfigMap>::new(configuration, transport);
    event_source.add_indexers(HashMap::from([(APP_INDEX.to_string(), app_indexer())]))?;
    event_source.add_event_handler(Arc::new(LoggingHandler));

    info!("start {} ...", event_source);
    event_source.start().await;
    let source = event_source.clone();
    let health = tokio::spawn(async move {
        let mut ticker = interval(HEALTH_LOG_INTERVAL);
        loop {
            ticker.tick().await;
            info!(
                "{} is {}, watches: {:?}",
                source,
                source.status(),
                source.informer_health_indicators()
            );
        }
    });
    let result = tokio::select! {
        Err(e) = start_prometheus_metrics_server(metrics_addr, registry) => Err(e),
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down ...");
            Ok(())
        }
    };
    health.abort();
    event_source.stop().await;
    if let Err(e) = meter_provider.shutdown() {
        warn!("failed to shut down meter provider: {}", e);
    }
    result
}
