//! Defines the HTTP surface of the viewer.
//!
//! ## Structure
//! - `POST /api/messages`: typed request/response messages (parse, load pages, history)
//! - `GET  /api/buckets`: recent buckets
//! - `GET  /api/buckets/{id}`: one bucket with its file count
//! - `GET  /api/buckets/{id}/files`: file records (category, search, sort, paging)
//! - `GET  /api/events`: notices as server-sent events
//! - `GET  /healthz`, `GET /readyz`

use crate::{
    handlers::{
        bucket_handlers::{events, get_bucket, list_buckets, list_files},
        health_handlers::{healthz, readyz},
        message_handlers::handle_message,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/messages", post(handle_message))
        .route("/api/buckets", get(list_buckets))
        .route("/api/buckets/{id}", get(get_bucket))
        .route("/api/buckets/{id}/files", get(list_files))
        .route("/api/events", get(events))
}
