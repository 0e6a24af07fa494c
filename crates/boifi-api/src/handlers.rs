use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::Sse;
use axum::Json;
use boifi_domain::FaultInjectionPolicy;
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;

use crate::error::ApiError;
use crate::sse;
use crate::state::AppState;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list().await?;
    Ok(StatusCode::OK)
}

// ── Policy CRUD ───────────────────────────────────────────────────────────

/// `POST /v1/policies`: create-or-update.
pub async fn put_policy(
    State(state): State<AppState>,
    Json(policy): Json<FaultInjectionPolicy>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let stored = state.store.put(policy).await?;
    Ok((StatusCode::CREATED, Json(json!(stored))))
}

/// `POST /v1/policies/create`: create only, 409 on conflict.
pub async fn create_policy(
    State(state): State<AppState>,
    Json(policy): Json<FaultInjectionPolicy>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let stored = state.store.create_only(policy).await?;
    Ok((StatusCode::CREATED, Json(json!(stored))))
}

/// `PUT /v1/policies/{id}`: update only; body name must match `{id}`.
pub async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(policy): Json<FaultInjectionPolicy>,
) -> Result<Json<Value>, ApiError> {
    let stored = state.store.update(&id, policy).await?;
    Ok(Json(json!(stored)))
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let policy = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("policy '{id}' not found")))?;
    Ok(Json(json!(policy)))
}

pub async fn list_policies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let policies = state.store.list().await?;
    Ok(Json(json!(policies)))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/policies/status`: active count, per-service counts, subscriber count.
pub async fn policies_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let policies = state.store.list().await?;

    let mut by_service: HashMap<String, usize> = HashMap::new();
    for p in &policies {
        *by_service.entry(p.spec.selector.service.clone()).or_default() += 1;
    }

    Ok(Json(json!({
        "active_count": policies.len(),
        "by_service": by_service,
        "subscriber_count": state.distributor.subscriber_count().await,
        "revision": state.distributor.current_revision().await,
    })))
}

// ── Subscription transport ───────────────────────────────────────────────

pub async fn config_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse::config_stream(state.distributor).await
}
