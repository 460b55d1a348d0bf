//! Read-only views over stored buckets, plus the notice event stream.

use crate::{
    errors::AppError,
    models::{
        bucket::BucketSummary,
        file::{FileQuery, FileRecord},
    },
    services::store::RECENT_BUCKETS_LIMIT,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

/// `GET /api/buckets`: most recent buckets with their file counts.
pub async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<BucketSummary>>, AppError> {
    let limit = query.limit.filter(|n| *n > 0).unwrap_or(RECENT_BUCKETS_LIMIT);
    Ok(Json(state.store().list_recent_buckets(limit).await?))
}

/// `GET /api/buckets/{id}`
pub async fn get_bucket(
    State(state): State<AppState>,
    Path(bucket_id): Path<Uuid>,
) -> Result<Json<BucketSummary>, AppError> {
    let store = state.store();
    let bucket = store.get_bucket(bucket_id).await?;
    let file_count = store.count_files(bucket_id).await?;
    Ok(Json(BucketSummary {
        bucket,
        file_count: i64::try_from(file_count).unwrap_or(i64::MAX),
    }))
}

/// `GET /api/buckets/{id}/files`: filtered and sorted file records.
pub async fn list_files(
    State(state): State<AppState>,
    Path(bucket_id): Path<Uuid>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.store().query_files(bucket_id, &query).await?))
}

/// `GET /api/events`: notices (such as the file cap being hit) as
/// server-sent events named `notice`.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.notifier.subscribe();
    debug!("event stream subscriber connected");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(notice) => match Event::default().event("notice").json_data(&notice) {
                    Ok(event) => yield Ok::<_, Infallible>(event),
                    Err(e) => warn!(error = %e, "could not encode notice"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
