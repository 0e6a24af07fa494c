use boifi_domain::{ApiEndpoint, ApiSource, MatchType};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Paths probed, in order, for a service's OpenAPI document. The first one
/// that resolves wins; none found means no enhancement for that service.
const WELL_KNOWN_PATHS: &[&str] = &["/swagger.json", "/v3/api-docs", "/openapi.json"];

/// Tries each well-known OpenAPI path against the service's base URL and,
/// if one is found, parses its path/method operations into exact-match
/// [`ApiEndpoint`]s. This is a best-effort enhancement layered over the
/// route-derived API list, never a requirement for publishing.
pub async fn try_enhance(client: &Client, service_base_url: &str) -> Option<Vec<ApiEndpoint>> {
    for path in WELL_KNOWN_PATHS {
        let url = format!("{service_base_url}{path}");
        let resp = match client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(url, status = %r.status(), "openapi probe path not found");
                continue;
            }
            Err(e) => {
                debug!(url, error = %e, "openapi probe request failed");
                continue;
            }
        };

        let Ok(doc) = resp.json::<Value>().await else {
            continue;
        };

        return Some(parse_operations(&doc));
    }
    None
}

fn parse_operations(doc: &Value) -> Vec<ApiEndpoint> {
    let mut endpoints = Vec::new();
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return endpoints;
    };
    for (path, operations) in paths {
        let Some(operations) = operations.as_object() else { continue };
        for method in operations.keys() {
            let method_upper = method.to_uppercase();
            if !["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"].contains(&method_upper.as_str()) {
                continue;
            }
            endpoints.push(ApiEndpoint { method: method_upper, path: path.clone(), match_type: MatchType::Exact });
        }
    }
    endpoints
}

const WILDCARD_METHOD: &str = "*";

/// Merges OpenAPI-derived endpoints over route-derived ones, keyed on
/// `(method, path, match_type)`; the OpenAPI source wins exact-key
/// conflicts since it carries richer metadata straight from the service's
/// own contract. A route-derived wildcard-method entry is also replaced by
/// any OpenAPI entry for the same path, since OpenAPI always names a
/// specific method and is strictly more precise than "any method matched".
pub fn merge_over_routes(route_derived: Vec<ApiEndpoint>, openapi_derived: Vec<ApiEndpoint>) -> Vec<(ApiEndpoint, ApiSource)> {
    use std::collections::HashMap;
    let mut merged: HashMap<(String, String, MatchType), (ApiEndpoint, ApiSource)> = route_derived
        .into_iter()
        .map(|e| ((e.method.clone(), e.path.clone(), e.match_type), (e, ApiSource::Route)))
        .collect();

    for e in openapi_derived {
        let wildcard_key = (WILDCARD_METHOD.to_string(), e.path.clone(), e.match_type);
        if matches!(merged.get(&wildcard_key), Some((_, ApiSource::Route))) {
            merged.remove(&wildcard_key);
        }
        merged.insert((e.method.clone(), e.path.clone(), e.match_type), (e, ApiSource::OpenApi));
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_operations_extracts_method_and_path() {
        let doc = json!({
            "paths": {
                "/reviews": {"get": {}, "post": {}},
                "/reviews/{id}": {"delete": {}}
            }
        });
        let endpoints = parse_operations(&doc);
        assert_eq!(endpoints.len(), 3);
        assert!(endpoints.iter().all(|e| e.match_type == MatchType::Exact));
    }

    #[test]
    fn merge_prefers_openapi_on_conflict() {
        let routes = vec![ApiEndpoint { method: "GET".into(), path: "/reviews".into(), match_type: MatchType::Exact }];
        let openapi = vec![ApiEndpoint { method: "GET".into(), path: "/reviews".into(), match_type: MatchType::Exact }];
        let merged = merge_over_routes(routes, openapi);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1, ApiSource::OpenApi);
    }

    #[test]
    fn merge_replaces_wildcard_method_route_with_openapi_specific_method() {
        let routes = vec![ApiEndpoint { method: "*".into(), path: "/reviews".into(), match_type: MatchType::Exact }];
        let openapi = vec![ApiEndpoint { method: "GET".into(), path: "/reviews".into(), match_type: MatchType::Exact }];
        let merged = merge_over_routes(routes, openapi);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].0.method, "GET");
        assert_eq!(merged[0].1, ApiSource::OpenApi);
    }

    #[test]
    fn merge_keeps_non_conflicting_routes() {
        let routes = vec![ApiEndpoint { method: "GET".into(), path: "/a".into(), match_type: MatchType::Exact }];
        let openapi = vec![ApiEndpoint { method: "GET".into(), path: "/b".into(), match_type: MatchType::Exact }];
        let merged = merge_over_routes(routes, openapi);
        assert_eq!(merged.len(), 2);
    }
}
