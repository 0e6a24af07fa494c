use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use boifi_distributor::Distributor;
use boifi_store::PolicyStore;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(store: Arc<dyn PolicyStore>, distributor: Arc<Distributor>, auth_token: Arc<String>) -> Router {
    let state = AppState { store, distributor, auth_token };

    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/ready", get(handlers::ready))
        .route("/v1/policies", get(handlers::list_policies).post(handlers::put_policy))
        .route("/v1/policies/create", post(handlers::create_policy))
        .route("/v1/policies/status", get(handlers::policies_status))
        .route(
            "/v1/policies/:id",
            get(handlers::get_policy).put(handlers::update_policy).delete(handlers::delete_policy),
        )
        .route("/v1/config/stream", get(handlers::config_stream))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use boifi_distributor::Distributor;
    use boifi_domain::{FaultAction, FaultInjectionPolicy, FaultRule, MatchPredicate, PolicyMetadata, PolicySpec, Selector};
    use boifi_store::InMemoryPolicyStore;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_app() -> Router {
        let store = Arc::new(InMemoryPolicyStore::new());
        let distributor = Arc::new(Distributor::default());
        build_app(store, distributor, Arc::new(TEST_TOKEN.to_string()))
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    fn sample_policy(name: &str) -> FaultInjectionPolicy {
        FaultInjectionPolicy {
            metadata: PolicyMetadata { name: name.to_string(), version: None, revision: None },
            spec: PolicySpec {
                selector: Selector::default(),
                rules: vec![FaultRule {
                    match_predicate: MatchPredicate::default(),
                    fault: FaultAction::Abort { http_status: 503 },
                    percentage: 100.0,
                    start_delay_ms: None,
                    duration_seconds: None,
                }],
            },
        }
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/v1/health")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_returns_200_with_empty_store() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/v1/ready")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let app = test_app();
        let body = serde_json::to_string(&sample_policy("checkout")).unwrap();

        let resp = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/v1/policies/create").header("content-type", "application/json"))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(authed(Request::builder().uri("/v1/policies/checkout")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_conflict_returns_409() {
        let app = test_app();
        let body = serde_json::to_string(&sample_policy("checkout")).unwrap();

        let first = app.clone().oneshot(
            authed(Request::builder().method("POST").uri("/v1/policies/create").header("content-type", "application/json"))
                .body(Body::from(body.clone()))
                .unwrap(),
        );
        assert_eq!(first.await.unwrap().status(), StatusCode::CREATED);

        let second = app.oneshot(
            authed(Request::builder().method("POST").uri("/v1/policies/create").header("content-type", "application/json"))
                .body(Body::from(body))
                .unwrap(),
        );
        assert_eq!(second.await.unwrap().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_missing_policy_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/v1/policies/nope")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_name_mismatch_returns_400() {
        let app = test_app();
        let body = serde_json::to_string(&sample_policy("checkout")).unwrap();
        let resp = app
            .oneshot(
                authed(Request::builder().method("PUT").uri("/v1/policies/other").header("content-type", "application/json"))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_missing_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().method("DELETE").uri("/v1/policies/nope")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/v1/policies/status")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_policies_returns_empty_array() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/v1/policies")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
