//! `POST /api/messages`: the request/response surface the viewer talks to.
//!
//! Every message is a JSON object with a `type` discriminator. Replies are
//! `{ "success": true, ...result }` or the [`AppError`] envelope.

use crate::{
    errors::AppError,
    services::{pagination::PaginationController, store::RECENT_BUCKETS_LIMIT},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    ParseBucket {
        url: String,
        base_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetBucketData { bucket_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LoadAllPages {
        bucket_id: Uuid,
        bucket_url: String,
        #[serde(default, deserialize_with = "lenient_max_keys")]
        max_keys: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    LoadNextPage {
        bucket_id: Uuid,
        bucket_url: String,
        #[serde(default, deserialize_with = "lenient_max_keys")]
        max_keys: Option<u32>,
        next_marker: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LoadSpecificPage {
        bucket_id: Uuid,
        bucket_url: String,
        page_number: u32,
        #[serde(default, deserialize_with = "lenient_max_keys")]
        max_keys: Option<u32>,
    },
    GetRecentBuckets { limit: Option<u32> },
    ClearHistory,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ParseBucket { .. } => "parseBucket",
            Message::GetBucketData { .. } => "getBucketData",
            Message::LoadAllPages { .. } => "loadAllPages",
            Message::LoadNextPage { .. } => "loadNextPage",
            Message::LoadSpecificPage { .. } => "loadSpecificPage",
            Message::GetRecentBuckets { .. } => "getRecentBuckets",
            Message::ClearHistory => "clearHistory",
        }
    }
}

/// Successful reply: the result's fields next to `"success": true`.
#[derive(Serialize, Debug)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u32),
    Text(String),
}

/// `maxKeys` arrives as a number or a numeric string. Anything that is not a
/// positive integer means "use the bucket's stored page size".
fn lenient_max_keys<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(match raw {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(text)) => text.trim().parse().ok(),
        None => None,
    }
    .filter(|n| *n > 0))
}

/// `POST /api/messages`
pub async fn handle_message(
    State(state): State<AppState>,
    payload: Result<Json<Message>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, AppError> {
    let Json(message) = payload.map_err(|rejection| {
        let err = AppError::from(rejection);
        warn!(error = %err, "rejected message");
        err
    })?;

    let kind = message.kind();
    match dispatch(&state.controller, message).await {
        Ok(data) => Ok(Json(Envelope::ok(data))),
        Err(err) => {
            if err.status.is_server_error() {
                error!(kind, code = err.code, error = %err, "message failed");
            } else {
                warn!(kind, code = err.code, error = %err, "message failed");
            }
            Err(err)
        }
    }
}

/// Run one message to completion and return the result fields.
#[instrument(skip(controller), fields(kind = message.kind()))]
pub async fn dispatch(
    controller: &PaginationController,
    message: Message,
) -> Result<Value, AppError> {
    let store = controller.store();
    match message {
        Message::ParseBucket { url, base_url } => {
            let outcome = controller.parse_bucket(&url, base_url.as_deref()).await?;
            to_value(outcome)
        }
        Message::GetBucketData { bucket_id } => {
            to_value(store.get_bucket_with_files(bucket_id).await?)
        }
        Message::LoadAllPages {
            bucket_id,
            bucket_url,
            max_keys,
        } => to_value(
            controller
                .load_all_pages(bucket_id, &bucket_url, max_keys)
                .await?,
        ),
        Message::LoadNextPage {
            bucket_id,
            bucket_url,
            max_keys,
            next_marker,
        } => to_value(
            controller
                .load_next_page(bucket_id, &bucket_url, max_keys, next_marker.as_deref())
                .await?,
        ),
        Message::LoadSpecificPage {
            bucket_id,
            bucket_url,
            page_number,
            max_keys,
        } => to_value(
            controller
                .load_specific_page(bucket_id, &bucket_url, page_number, max_keys)
                .await?,
        ),
        Message::GetRecentBuckets { limit } => {
            let limit = limit.filter(|n| *n > 0).unwrap_or(RECENT_BUCKETS_LIMIT);
            let buckets = store.list_recent_buckets(limit).await?;
            Ok(json!({ "buckets": buckets }))
        }
        Message::ClearHistory => {
            store.clear_all().await?;
            Ok(json!({}))
        }
    }
}

fn to_value<T: Serialize>(data: T) -> Result<Value, AppError> {
    serde_json::to_value(data).map_err(|e| AppError::internal(e.to_string()))
}
