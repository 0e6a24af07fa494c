use std::sync::Arc;

use boifi_domain::{ApiSource, ServiceEntry, ServiceMap};
use chrono::Utc;
use kube::Client;
use reqwest::Client as HttpClient;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::DiscoveryError;
use crate::kubernetes::discover_virtual_service_routes;
use crate::openapi::{merge_over_routes, try_enhance};
use crate::publisher::KvPublisher;
use crate::topology::fetch_topology;

/// One assembled pass over the cluster: Kubernetes routes, trace topology,
/// and (optionally) OpenAPI enhancement, published as a single
/// [`ServiceMap`] document.
pub struct DiscoveryPipeline {
    kube_client: Client,
    http_client: HttpClient,
    trace_dependencies_url: String,
    service_base_url_template: Option<String>,
    publisher: Arc<dyn KvPublisher>,
    service_map_key: String,
    notify_channel: String,
    interval_secs: u64,
    lookback_secs: u64,
    /// The last map this pipeline managed to assemble, owned by the
    /// scheduler's tick loop: kept around so a publish failure can be
    /// recorded onto a real snapshot instead of discarding the tick's work.
    last_snapshot: RwLock<Option<ServiceMap>>,
}

impl DiscoveryPipeline {
    pub fn new(
        kube_client: Client,
        trace_dependencies_url: impl Into<String>,
        service_base_url_template: Option<String>,
        publisher: Arc<dyn KvPublisher>,
        service_map_key: impl Into<String>,
        notify_channel: impl Into<String>,
        interval_secs: u64,
        lookback_secs: u64,
    ) -> Self {
        Self {
            kube_client,
            http_client: HttpClient::new(),
            trace_dependencies_url: trace_dependencies_url.into(),
            service_base_url_template,
            publisher,
            service_map_key: service_map_key.into(),
            notify_channel: notify_channel.into(),
            interval_secs,
            lookback_secs,
            last_snapshot: RwLock::new(None),
        }
    }

    /// The last successfully-or-partially published [`ServiceMap`], if any
    /// tick has run yet.
    pub async fn last_snapshot(&self) -> Option<ServiceMap> {
        self.last_snapshot.read().await.clone()
    }

    /// Runs one full discovery cycle. Never returns an error for a
    /// cluster-internal partial failure (missing routes, unreachable trace
    /// backend) — those are folded into `ServiceMap.metadata.errors` and the
    /// tick still publishes. It only errors if the KV publish itself fails
    /// after its retry budget, or talking to Kubernetes fails outright.
    pub async fn run_tick(&self) -> Result<(), DiscoveryError> {
        let now = Utc::now();
        let mut map = ServiceMap::empty(now, self.interval_secs, self.lookback_secs);

        let routes = discover_virtual_service_routes(&self.kube_client).await?;
        for ((service, namespace), route_endpoints) in routes {
            let openapi_endpoints = match &self.service_base_url_template {
                Some(template) => {
                    let base_url = template.replace("{service}", &service).replace("{namespace}", &namespace);
                    try_enhance(&self.http_client, &base_url).await.unwrap_or_default()
                }
                None => Vec::new(),
            };

            let merged = merge_over_routes(route_endpoints, openapi_endpoints);
            let source = if merged.iter().any(|(_, s)| *s == ApiSource::OpenApi) { ApiSource::OpenApi } else { ApiSource::Route };
            let apis = merged.into_iter().map(|(e, _)| e).collect();

            map.services.insert(format!("{service}.{namespace}"), ServiceEntry { name: service, namespace, apis, source });
        }

        let (topology, topology_error) = fetch_topology(&self.http_client, &self.trace_dependencies_url, self.lookback_secs).await;
        map.topology = topology;
        if let Some(err) = topology_error {
            map.metadata.errors.push(err);
        }

        if let Err(e) = map.validate() {
            warn!(error = %e, "assembled service map failed validation, publishing anyway with errors recorded");
            map.metadata.errors.push(e.to_string());
        }

        let body = serde_json::to_vec(&map).map_err(|e| DiscoveryError::PublishFailed(format!("serializing service map: {e}")))?;

        match self.publish(&body).await {
            Ok(()) => {
                info!(services = map.services.len(), edges = map.topology.len(), "published service map");
                *self.last_snapshot.write().await = Some(map);
                Ok(())
            }
            Err(e) => {
                // The assembled map is still the most current view of the
                // cluster even though publish failed; keep it as the
                // last-successful snapshot rather than discarding it, with
                // the failure recorded in its own metadata.
                map.metadata.errors.push(format!("publish failed: {e}"));
                *self.last_snapshot.write().await = Some(map);
                Err(e)
            }
        }
    }

    async fn publish(&self, body: &[u8]) -> Result<(), DiscoveryError> {
        self.publisher.put(&self.service_map_key, body.to_vec()).await?;
        self.publisher.notify(&self.notify_channel).await?;
        Ok(())
    }
}
