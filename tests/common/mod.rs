//! Shared helpers for integration tests: an in-memory store, a controller
//! wired to a broadcast notifier and canned listing bodies.
#![allow(dead_code)]

use bucket_viewer::{
    services::{
        listing_fetcher::{FetchConfig, ListingFetcher},
        notifier::BroadcastNotifier,
        pagination::{Limits, PaginationController},
        store::BucketStore,
    },
    state::AppState,
};
use std::time::Duration;
use wiremock::{MockServer, Request, ResponseTemplate};

pub async fn memory_store() -> BucketStore {
    BucketStore::connect("sqlite::memory:", Duration::from_secs(5))
        .await
        .expect("in-memory store")
}

pub fn fetch_config() -> FetchConfig {
    FetchConfig {
        user_agent: "bucket-viewer-tests".into(),
        probe_timeout: Duration::from_secs(5),
        page_timeout: Some(Duration::from_secs(5)),
    }
}

pub async fn app_state(max_files: u64) -> AppState {
    app_state_with(max_files, fetch_config()).await
}

pub async fn app_state_with(max_files: u64, config: FetchConfig) -> AppState {
    let fetcher = ListingFetcher::new(config).expect("http client");
    AppState::new(
        memory_store().await,
        fetcher,
        BroadcastNotifier::default(),
        Limits {
            max_files,
            ..Limits::default()
        },
    )
}

pub async fn controller(max_files: u64) -> (PaginationController, BroadcastNotifier) {
    let state = app_state(max_files).await;
    (state.controller, state.notifier)
}

pub fn bucket_url(server: &MockServer) -> String {
    format!("{}/bucket/", server.uri())
}

/// An S3 ListBucketResult body with one `Contents` block per key.
pub fn listing(max_keys: u32, keys: &[&str], next_marker: Option<&str>, truncated: bool) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix></Prefix>
"#,
    );
    body.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", max_keys));
    body.push_str(&format!("  <IsTruncated>{}</IsTruncated>\n", truncated));
    if let Some(marker) = next_marker {
        body.push_str(&format!("  <NextMarker>{}</NextMarker>\n", marker));
    }
    for (i, key) in keys.iter().enumerate() {
        body.push_str(&format!(
            "  <Contents>\n    <Key>{}</Key>\n    <LastModified>2024-01-0{}T10:00:00.000Z</LastModified>\n    <ETag>\"etag-{}\"</ETag>\n    <Size>{}</Size>\n    <StorageClass>STANDARD</StorageClass>\n  </Contents>\n",
            key,
            (i % 9) + 1,
            i,
            (i + 1) * 100
        ));
    }
    body.push_str("</ListBucketResult>\n");
    body
}

pub fn xml_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/xml")
        .set_body_string(body)
}

/// Responds to every page request with `page_size` fresh keys and a marker
/// pointing at the last one, forever.
pub fn endless_pages(page_size: usize) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    move |request: &Request| {
        let start = request
            .url
            .query_pairs()
            .find(|(name, _)| name == "marker")
            .and_then(|(_, marker)| {
                marker
                    .strip_prefix("file-")
                    .and_then(|rest| rest.strip_suffix(".txt"))
                    .and_then(|n| n.parse::<usize>().ok())
            })
            .map(|n| n + 1)
            .unwrap_or(0);

        let keys: Vec<String> = (start..start + page_size)
            .map(|n| format!("file-{:04}.txt", n))
            .collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let marker = keys.last().cloned();
        xml_response(listing(page_size as u32, &refs, marker.as_deref(), true))
    }
}
