use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{
    listing_fetcher::FetchError, pagination::ListingError, store::StoreError,
};

/// A failed operation, rendered as `{ "success": false, ... }`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    /// Stable machine-readable class of failure.
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    /// The JSON body shared by HTTP responses and the one-shot CLI.
    pub fn envelope(&self) -> serde_json::Value {
        json!({
            "success": false,
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        })
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope())).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::BucketNotFound(_) => AppError::not_found(err.to_string()),
            StoreError::InitTimeout(_) | StoreError::Unavailable(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                err.to_string(),
            ),
            StoreError::Sqlx(_) | StoreError::Io(_) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            ),
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match &err {
            FetchError::Client(_) => AppError::internal(err.to_string()),
            FetchError::Timeout { .. } => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string())
            }
            FetchError::Network { .. } | FetchError::HttpStatus { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "fetch_failed", err.to_string())
            }
            FetchError::EmptyResponse | FetchError::NotXml | FetchError::Extract(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "invalid_listing", err.to_string())
            }
        }
    }
}

impl From<ListingError> for AppError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::InvalidUrl { .. } => AppError::bad_request(err.to_string()),
            ListingError::Fetch(err) => err.into(),
            ListingError::Store(err) => err.into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(rejection.status(), "bad_request", rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn store_errors_keep_their_class() {
        let missing: AppError = StoreError::BucketNotFound(Uuid::nil()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let not_ready: AppError =
            StoreError::InitTimeout(std::time::Duration::from_secs(10)).into();
        assert_eq!(not_ready.code, "storage_unavailable");
        assert_eq!(not_ready.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn format_errors_are_invalid_listing() {
        let err: AppError = ListingError::Fetch(FetchError::NotXml).into();
        assert_eq!(err.code, "invalid_listing");
        assert_eq!(err.envelope()["success"], false);
        assert_eq!(err.envelope()["error"], "server response is not valid XML");
    }

    #[test]
    fn client_build_failure_is_internal() {
        let source = reqwest::Client::builder()
            .user_agent("bad\nagent")
            .build()
            .unwrap_err();
        let err: AppError = FetchError::Client(source).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal");
    }

    #[test]
    fn http_status_errors_carry_code_and_reason() {
        let err: AppError = FetchError::HttpStatus {
            status: 403,
            reason: "Forbidden".into(),
        }
        .into();
        assert_eq!(err.code, "fetch_failed");
        assert_eq!(err.message, "HTTP 403: Forbidden");
    }
}
