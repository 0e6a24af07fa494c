use std::collections::{HashMap, HashSet};

use boifi_domain::{ApiEndpoint, MatchType};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use serde_json::Value;
use tracing::warn;

use crate::error::DiscoveryError;

/// Keyed by `(service, namespace)`, values deduplicated on
/// `(method, path, match_type)`.
pub type RouteMap = HashMap<(String, String), Vec<ApiEndpoint>>;

/// Lists every Istio `VirtualService` in the cluster and flattens its HTTP
/// match rules into route-derived [`ApiEndpoint`]s per destination service.
/// Istio isn't a compiled dependency anywhere in the corpus, so matches are
/// read out of the object's raw JSON rather than a typed CRD struct — the
/// same `kube::api::DynamicObject` approach the sibling cluster-controller
/// example uses for resources it doesn't have a typed model for.
pub async fn discover_virtual_service_routes(client: &Client) -> Result<RouteMap, DiscoveryError> {
    let gvk = GroupVersionKind::gvk("networking.istio.io", "v1beta1", "VirtualService");
    let resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);

    let list = api.list(&ListParams::default()).await?;

    let mut routes: RouteMap = HashMap::new();
    for obj in list.items {
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        let Some(spec) = obj.data.get("spec") else {
            warn!(virtual_service = %name, "VirtualService has no spec, skipping");
            continue;
        };

        let services = destination_services(spec);
        if services.is_empty() {
            warn!(virtual_service = %name, "VirtualService has no resolvable destination host, skipping");
            continue;
        }

        let endpoints = http_match_endpoints(spec, &name);
        for service in services {
            let entry = routes.entry((service, namespace.clone())).or_default();
            let mut seen: HashSet<(String, String, MatchType)> =
                entry.iter().map(|e| (e.method.clone(), e.path.clone(), e.match_type)).collect();
            for ep in &endpoints {
                let key = (ep.method.clone(), ep.path.clone(), ep.match_type);
                if seen.insert(key) {
                    entry.push(ep.clone());
                }
            }
        }
    }

    Ok(routes)
}

fn destination_services(spec: &Value) -> Vec<String> {
    let mut services = HashSet::new();
    if let Some(hosts) = spec.get("hosts").and_then(Value::as_array) {
        for host in hosts {
            if let Some(h) = host.as_str() {
                services.insert(h.to_string());
            }
        }
    }
    if services.is_empty() {
        if let Some(http_rules) = spec.get("http").and_then(Value::as_array) {
            for rule in http_rules {
                if let Some(routes) = rule.get("route").and_then(Value::as_array) {
                    for route in routes {
                        if let Some(host) = route.pointer("/destination/host").and_then(Value::as_str) {
                            services.insert(host.to_string());
                        }
                    }
                }
            }
        }
    }
    services.into_iter().collect()
}

fn http_match_endpoints(spec: &Value, virtual_service_name: &str) -> Vec<ApiEndpoint> {
    let mut endpoints = Vec::new();
    let Some(http_rules) = spec.get("http").and_then(Value::as_array) else {
        return endpoints;
    };

    for rule in http_rules {
        let Some(matches) = rule.get("match").and_then(Value::as_array) else {
            continue;
        };
        for m in matches {
            let method = m.pointer("/method/exact").and_then(Value::as_str).unwrap_or("*").to_string();
            let Some(uri) = m.get("uri") else {
                warn!(virtual_service = %virtual_service_name, "http match has no uri matcher, skipping");
                continue;
            };
            let (path, match_type) = if let Some(v) = uri.get("exact").and_then(Value::as_str) {
                (v.to_string(), MatchType::Exact)
            } else if let Some(v) = uri.get("prefix").and_then(Value::as_str) {
                (v.to_string(), MatchType::Prefix)
            } else if let Some(v) = uri.get("regex").and_then(Value::as_str) {
                (v.to_string(), MatchType::Regex)
            } else {
                warn!(virtual_service = %virtual_service_name, matcher = %uri, "unrecognized uri match type, skipping");
                continue;
            };
            endpoints.push(ApiEndpoint { method, path, match_type });
        }
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn destination_services_prefers_hosts_field() {
        let spec = json!({"hosts": ["reviews", "reviews.prod.svc.cluster.local"]});
        let services = destination_services(&spec);
        assert_eq!(services.len(), 2);
    }

    #[test]
    fn destination_services_falls_back_to_route_destination() {
        let spec = json!({
            "http": [{"route": [{"destination": {"host": "reviews"}}]}]
        });
        assert_eq!(destination_services(&spec), vec!["reviews".to_string()]);
    }

    #[test]
    fn http_match_endpoints_extracts_exact_prefix_and_regex() {
        let spec = json!({
            "http": [{
                "match": [
                    {"method": {"exact": "GET"}, "uri": {"exact": "/reviews"}},
                    {"uri": {"prefix": "/api/"}},
                    {"uri": {"regex": "^/v[0-9]+/reviews$"}}
                ]
            }]
        });
        let endpoints = http_match_endpoints(&spec, "reviews-vs");
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].method, "GET");
        assert_eq!(endpoints[0].match_type, MatchType::Exact);
        assert_eq!(endpoints[1].match_type, MatchType::Prefix);
        assert_eq!(endpoints[1].method, "*");
        assert_eq!(endpoints[2].match_type, MatchType::Regex);
    }

    #[test]
    fn unrecognized_match_type_is_dropped() {
        let spec = json!({
            "http": [{"match": [{"uri": {"authority": {"exact": "foo"}}}]}]
        });
        assert!(http_match_endpoints(&spec, "weird-vs").is_empty());
    }

    #[test]
    fn missing_uri_matcher_is_dropped() {
        let spec = json!({"http": [{"match": [{"method": {"exact": "GET"}}]}]});
        assert!(http_match_endpoints(&spec, "no-uri-vs").is_empty());
    }
}
