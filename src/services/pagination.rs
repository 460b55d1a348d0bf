//! src/services/pagination.rs
//!
//! PaginationController: drives parse and page-loading sequences for one
//! bucket. Pages are always fetched and stored one after another, so any
//! early stop leaves a contiguous prefix of the listing persisted.

use crate::{
    models::{
        bucket::{NewBucket, derive_base_url},
        file::NewFile,
    },
    services::{
        listing_fetcher::{FetchError, ListingFetcher},
        notifier::{Notice, NoticeLevel, Notifier},
        store::{BucketStore, StoreError},
    },
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Page size assumed when the server does not advertise a usable `MaxKeys`.
pub const DEFAULT_MAX_KEYS: u32 = 1000;

/// Ceiling on files stored per bucket.
pub const MAX_FILES_PER_BUCKET: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("invalid bucket url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ListingResult<T> = Result<T, ListingError>;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_files: u64,
    pub default_max_keys: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: MAX_FILES_PER_BUCKET,
            default_max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutcome {
    pub bucket_id: Uuid,
    pub file_count: u64,
    pub has_more_pages: bool,
    pub max_keys: u32,
    pub next_marker: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadAllOutcome {
    pub file_count: u64,
    pub pages_loaded: u32,
    /// The file cap stopped loading before the listing ran out.
    pub capped: bool,
    /// Why loading stopped early without hitting the cap, if it did.
    pub halted: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageOutcome {
    pub files_loaded: u64,
    pub file_count: u64,
    pub next_marker: Option<String>,
    pub has_more_pages: bool,
    pub capped: bool,
}

/// The pagination hints of a first page. Any one of them is enough to offer
/// further loading; a false "more pages" is cheaper than silently truncating.
#[derive(Debug, Default, Clone, Copy)]
struct MoreSignals {
    next_marker: bool,
    is_truncated: bool,
    full_page: bool,
    indicated: bool,
}

impl MoreSignals {
    fn any(&self) -> bool {
        self.next_marker || self.is_truncated || self.full_page || self.indicated
    }
}

/// Coordinates the fetcher and the store for one bucket at a time.
///
/// Calls for the same bucket URL are not serialized against each other;
/// callers that need consistency must not overlap them.
#[derive(Clone)]
pub struct PaginationController {
    store: BucketStore,
    fetcher: ListingFetcher,
    notifier: Arc<dyn Notifier>,
    limits: Limits,
}

impl PaginationController {
    pub fn new(
        store: BucketStore,
        fetcher: ListingFetcher,
        notifier: Arc<dyn Notifier>,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            limits,
        }
    }

    pub fn store(&self) -> &BucketStore {
        &self.store
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Parse a bucket from scratch: probe it, upsert the bucket record and
    /// store the first page. Never fetches past page 1.
    #[instrument(skip(self))]
    pub async fn parse_bucket(
        &self,
        url: &str,
        base_url: Option<&str>,
    ) -> ListingResult<ParseOutcome> {
        let base_url = match base_url.filter(|b| !b.is_empty()) {
            Some(base) => base.to_string(),
            None => derive_base_url(url).map_err(|source| ListingError::InvalidUrl {
                url: url.to_string(),
                source,
            })?,
        };

        info!(%url, %base_url, "parsing bucket");
        let probe = self.fetcher.probe(url).await?;
        let max_keys = parse_max_keys(probe.max_keys.as_deref(), self.limits.default_max_keys);
        debug!(max_keys, child_tags = ?probe.child_tags, "probe complete");

        let bucket_id = self
            .store
            .upsert_bucket(&NewBucket {
                url: url.to_string(),
                base_url,
                max_keys,
                has_pagination: probe.next_marker.is_some(),
                child_tags: probe.child_tags.clone(),
            })
            .await?;

        let page = self
            .fetcher
            .fetch_page(url, max_keys, None, &probe.child_tags)
            .await?;
        let (files, _) = self.within_cap(page.files, 0);
        self.store.insert_files(bucket_id, &files).await?;
        let file_count = self.store.count_files(bucket_id).await?;

        let signals = MoreSignals {
            next_marker: probe.next_marker.is_some() || page.next_marker.is_some(),
            is_truncated: probe.is_truncated || page.is_truncated,
            full_page: file_count >= u64::from(max_keys),
            indicated: probe.has_more_pages_indicated || page.has_more_pages_indicated,
        };
        let has_more_pages = signals.any();
        info!(%bucket_id, file_count, has_more_pages, ?signals, "first page loaded");

        Ok(ParseOutcome {
            bucket_id,
            file_count,
            has_more_pages,
            max_keys,
            next_marker: page.next_marker.or(probe.next_marker),
        })
    }

    /// Reload every page of a bucket, following markers until the listing
    /// ends, a page fails, or the file cap is reached.
    ///
    /// Existing files are dropped once the first page has arrived. Each page
    /// is stored before the next is requested; a failed page halts the
    /// sequence but keeps what was already stored.
    #[instrument(skip(self), fields(bucket_id = %bucket_id))]
    pub async fn load_all_pages(
        &self,
        bucket_id: Uuid,
        bucket_url: &str,
        max_keys: Option<u32>,
    ) -> ListingResult<LoadAllOutcome> {
        let bucket = self.store.get_bucket(bucket_id).await?;
        let max_keys = max_keys.filter(|n| *n > 0).unwrap_or(bucket.max_keys);

        let mut marker: Option<String> = None;
        let mut pages_loaded: u32 = 0;
        let mut stored: u64 = 0;
        let mut capped = false;
        let mut halted = None;

        loop {
            let page = match self
                .fetcher
                .fetch_page(bucket_url, max_keys, marker.as_deref(), &bucket.child_tags)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(page = pages_loaded + 1, error = %err, "page fetch failed, halting");
                    halted = Some(err.to_string());
                    break;
                }
            };

            if pages_loaded == 0 {
                let removed = self.store.delete_files_for_bucket(bucket_id).await?;
                debug!(removed, "cleared previous files");
            }

            let received = page.files.len();
            let (files, truncated) = self.within_cap(page.files, stored);
            self.store.insert_files(bucket_id, &files).await?;
            stored += files.len() as u64;
            pages_loaded += 1;
            info!(page = pages_loaded, files = files.len(), total = stored, "page stored");

            if stored >= self.limits.max_files {
                capped = truncated || page.next_marker.is_some();
                if capped {
                    self.notify_cap(bucket_id, stored);
                }
                break;
            }

            match page.next_marker {
                Some(next) if received == 0 => {
                    warn!(marker = %next, "empty page with a marker, stopping");
                    halted = Some(format!("page {} was empty", pages_loaded));
                    break;
                }
                Some(next) if marker.as_deref() == Some(next.as_str()) => {
                    warn!(marker = %next, "server repeated the previous marker, stopping");
                    halted = Some(format!("marker `{}` repeated", next));
                    break;
                }
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        let file_count = self.store.count_files(bucket_id).await?;
        info!(file_count, pages_loaded, capped, "finished loading pages");
        Ok(LoadAllOutcome {
            file_count,
            pages_loaded,
            capped,
            halted,
        })
    }

    /// Fetch exactly one page after `next_marker` (or from the start) and
    /// append it.
    #[instrument(skip(self), fields(bucket_id = %bucket_id))]
    pub async fn load_next_page(
        &self,
        bucket_id: Uuid,
        bucket_url: &str,
        max_keys: Option<u32>,
        next_marker: Option<&str>,
    ) -> ListingResult<PageOutcome> {
        let bucket = self.store.get_bucket(bucket_id).await?;
        let max_keys = max_keys.filter(|n| *n > 0).unwrap_or(bucket.max_keys);
        let existing = self.store.count_files(bucket_id).await?;

        let page = self
            .fetcher
            .fetch_page(bucket_url, max_keys, next_marker, &bucket.child_tags)
            .await?;
        let (files, capped) = self.within_cap(page.files, existing);
        self.store.insert_files(bucket_id, &files).await?;
        let file_count = self.store.count_files(bucket_id).await?;
        if capped {
            self.notify_cap(bucket_id, file_count);
        }

        Ok(PageOutcome {
            files_loaded: files.len() as u64,
            file_count,
            has_more_pages: page.next_marker.is_some(),
            next_marker: page.next_marker,
            capped,
        })
    }

    /// Page 1 reports what is already stored; any other number loads the
    /// page after the first boundary, regardless of the number requested.
    #[instrument(skip(self), fields(bucket_id = %bucket_id))]
    pub async fn load_specific_page(
        &self,
        bucket_id: Uuid,
        bucket_url: &str,
        page_number: u32,
        max_keys: Option<u32>,
    ) -> ListingResult<PageOutcome> {
        if page_number != 1 {
            debug!(page_number, "no random access, loading next page");
            return self
                .load_next_page(bucket_id, bucket_url, max_keys, None)
                .await;
        }

        let bucket = self.store.get_bucket(bucket_id).await?;
        let max_keys = max_keys.filter(|n| *n > 0).unwrap_or(bucket.max_keys);
        let file_count = self.store.count_files(bucket_id).await?;
        Ok(PageOutcome {
            files_loaded: file_count,
            file_count,
            next_marker: None,
            has_more_pages: file_count >= u64::from(max_keys),
            capped: false,
        })
    }

    /// Keep only as many files as still fit under the cap given `stored`
    /// already persisted. The flag is set when anything was dropped.
    fn within_cap(&self, mut files: Vec<NewFile>, stored: u64) -> (Vec<NewFile>, bool) {
        let room = self.limits.max_files.saturating_sub(stored);
        let room = usize::try_from(room).unwrap_or(usize::MAX);
        let truncated = files.len() > room;
        files.truncate(room);
        (files, truncated)
    }

    fn notify_cap(&self, bucket_id: Uuid, stored: u64) {
        warn!(
            %bucket_id,
            limit = self.limits.max_files,
            stored,
            "file limit reached, stopped loading"
        );
        let notice = Notice {
            bucket_id,
            level: NoticeLevel::Warning,
            message: format!(
                "Reached the {} file limit and stopped loading. {} files are loaded.",
                self.limits.max_files, stored
            ),
        };
        if let Err(err) = self.notifier.notify(notice) {
            debug!(error = %err, "could not deliver cap notice");
        }
    }
}

/// Server-advertised `MaxKeys`, falling back to `default` when missing,
/// unparseable or zero.
pub fn parse_max_keys(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_keys_fallbacks() {
        assert_eq!(parse_max_keys(Some("250"), 1000), 250);
        assert_eq!(parse_max_keys(Some(" 2 "), 1000), 2);
        assert_eq!(parse_max_keys(Some("abc"), 1000), 1000);
        assert_eq!(parse_max_keys(Some("0"), 1000), 1000);
        assert_eq!(parse_max_keys(None, 1000), 1000);
    }

    #[test]
    fn any_signal_means_more_pages() {
        assert!(!MoreSignals::default().any());
        assert!(
            MoreSignals {
                full_page: true,
                ..MoreSignals::default()
            }
            .any()
        );
        assert!(
            MoreSignals {
                indicated: true,
                ..MoreSignals::default()
            }
            .any()
        );
    }
}
