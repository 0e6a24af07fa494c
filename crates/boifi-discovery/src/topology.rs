use boifi_domain::ServiceEdge;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

/// Shape returned by a Jaeger-style `/api/dependencies` endpoint.
#[derive(Debug, Deserialize)]
struct DependenciesResponse {
    data: Vec<DependencyLink>,
}

#[derive(Debug, Deserialize)]
struct DependencyLink {
    parent: String,
    child: String,
    #[serde(rename = "callCount")]
    call_count: u64,
}

/// Fetches the trace backend's service dependency graph. Backend
/// unavailability never fails the discovery cycle: it's recorded as a
/// stringified error for `ServiceMapMetadata.errors` and the topology comes
/// back empty so the rest of the tick (routes, OpenAPI) still publishes.
pub async fn fetch_topology(client: &Client, dependencies_url: &str, lookback_secs: u64) -> (Vec<ServiceEdge>, Option<String>) {
    let url = format!("{dependencies_url}?lookback={lookback_secs}");
    match client.get(&url).send().await {
        Ok(resp) => match resp.error_for_status() {
            Ok(resp) => match resp.json::<DependenciesResponse>().await {
                Ok(body) => {
                    let edges = body
                        .data
                        .into_iter()
                        .map(|link| ServiceEdge { source: link.parent, target: link.child, call_count: link.call_count })
                        .collect();
                    (edges, None)
                }
                Err(e) => {
                    warn!(error = %e, "failed to decode trace dependencies response");
                    (Vec::new(), Some(format!("topology decode error: {e}")))
                }
            },
            Err(e) => {
                warn!(error = %e, "trace backend returned an error status");
                (Vec::new(), Some(format!("topology backend error: {e}")))
            }
        },
        Err(e) => {
            warn!(error = %e, "trace backend unreachable");
            (Vec::new(), Some(format!("topology backend unreachable: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_backend_returns_empty_topology_with_recorded_error() {
        let client = Client::new();
        let (edges, error) = fetch_topology(&client, "http://127.0.0.1:1", 3600).await;
        assert!(edges.is_empty());
        assert!(error.is_some());
    }
}
