use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// HTTP-facing error, mapped from the domain/store/distributor error kinds
/// per the error taxonomy: `InvalidInput` -> 400, `NotFound` -> 404,
/// `AlreadyExists` -> 409, everything else -> 500.
pub struct ApiError {
    pub category: &'static str,
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(category: &'static str, msg: impl Into<String>) -> Self {
        ApiError { category, status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { category: "not_found", status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError { category: "already_exists", status: StatusCode::CONFLICT, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { category: "internal", status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.category, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<boifi_domain::DomainError> for ApiError {
    fn from(e: boifi_domain::DomainError) -> Self {
        ApiError::bad_request("invalid_input", e.to_string())
    }
}

impl From<boifi_store::StoreError> for ApiError {
    fn from(e: boifi_store::StoreError) -> Self {
        use boifi_store::StoreError;
        match e {
            StoreError::InvalidPolicy(msg) => ApiError::bad_request("invalid_input", msg),
            StoreError::NameMismatch { path, body } => ApiError::bad_request(
                "invalid_input",
                format!("path name '{path}' does not match body name '{body}'"),
            ),
            StoreError::Serialization(err) => ApiError::bad_request("invalid_input", err.to_string()),
            StoreError::NotFound(name) => ApiError::not_found(format!("policy '{name}' not found")),
            StoreError::AlreadyExists(name) => ApiError::conflict(format!("policy '{name}' already exists")),
            StoreError::WatchTerminated(msg) => ApiError::internal(msg),
            StoreError::Internal(msg) => ApiError::internal(msg),
        }
    }
}

impl From<boifi_distributor::DistributorError> for ApiError {
    fn from(e: boifi_distributor::DistributorError) -> Self {
        ApiError::internal(e.to_string())
    }
}
