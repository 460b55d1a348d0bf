//! Represents a parsed bucket listing: the URL that was fetched and what the
//! first page told us about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::file::FileRecord;

/// A remote S3-style listing endpoint that has been parsed at least once.
///
/// Several rows may share a `url` across separate crawls; re-parsing a URL
/// replaces the newest matching row in place.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Bucket {
    /// Store-assigned identifier, stable across re-parses of the same URL.
    pub id: Uuid,

    /// Exact listing URL that was requested.
    pub url: String,

    /// `scheme://host/` root of `url`, unless the caller supplied one.
    pub base_url: String,

    /// Page size advertised by the server.
    pub max_keys: u32,

    /// Whether the first page carried a continuation marker.
    pub has_pagination: bool,

    /// Field names seen in the first page's `Contents` blocks, in first-seen
    /// order. Later pages are projected onto this set.
    #[sqlx(json)]
    pub child_tags: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,
}

/// Bucket fields supplied by a parse, before the store assigns identity.
#[derive(Debug, Clone)]
pub struct NewBucket {
    pub url: String,
    pub base_url: String,
    pub max_keys: u32,
    pub has_pagination: bool,
    pub child_tags: Vec<String>,
}

/// A bucket together with how many files are currently stored for it.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct BucketSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub bucket: Bucket,

    pub file_count: i64,
}

/// A bucket and every file stored for it, in insertion order.
#[derive(Serialize, Debug)]
pub struct BucketWithFiles {
    pub bucket: Bucket,
    pub files: Vec<FileRecord>,
}

/// Derive the `scheme://host[:port]/` root of a listing URL.
pub fn derive_base_url(bucket_url: &str) -> Result<String, url::ParseError> {
    let parsed = url::Url::parse(bucket_url)?;
    let host = parsed.host_str().ok_or(url::ParseError::EmptyHost)?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}/", parsed.scheme(), host, port),
        None => format!("{}://{}/", parsed.scheme(), host),
    })
}
