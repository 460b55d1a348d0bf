//! src/services/listing_fetcher.rs
//!
//! One GET per listing page. The fetcher builds the page URL, validates the
//! response, hands the body to the extractor and projects the extracted
//! `Contents` maps onto the bucket's established child tags.

use crate::{
    models::file::NewFile,
    services::xml_extractor::{self, ExtractError, Extraction},
};
use reqwest::{Client, header::USER_AGENT};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to `{url}` timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("request to `{url}` failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },
    #[error("server returned an empty response")]
    EmptyResponse,
    #[error("server response is not valid XML")]
    NotXml,
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("XML parsing failed: {0}")]
    Extract(#[from] ExtractError),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// HTTP settings for listing requests.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Sent on the first request of a parse only.
    pub user_agent: String,
    /// Deadline for the first request of a parse.
    pub probe_timeout: Duration,
    /// Deadline for page requests; `None` leaves them unbounded.
    pub page_timeout: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("bucket-viewer/", env!("CARGO_PKG_VERSION")).to_string(),
            probe_timeout: Duration::from_secs(30),
            page_timeout: None,
        }
    }
}

/// One fetched page, already mapped to file records.
#[derive(Debug, Clone)]
pub struct Page {
    pub files: Vec<NewFile>,
    pub next_marker: Option<String>,
    pub is_truncated: bool,
    pub has_more_pages_indicated: bool,
}

#[derive(Clone)]
pub struct ListingFetcher {
    client: Client,
    config: FetchConfig,
}

impl ListingFetcher {
    pub fn new(config: FetchConfig) -> FetchResult<Self> {
        let client = Client::builder().build().map_err(FetchError::Client)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// First request of a parse: the bare bucket URL, with the descriptive
    /// user agent and the probe deadline. The body must look like a listing.
    #[instrument(skip(self))]
    pub async fn probe(&self, bucket_url: &str) -> FetchResult<Extraction> {
        let request = self
            .client
            .get(bucket_url)
            .header(USER_AGENT, &self.config.user_agent)
            .timeout(self.config.probe_timeout);
        let body = self
            .send(bucket_url, request, Some(self.config.probe_timeout))
            .await?;

        if !looks_like_listing(&body) {
            let preview: String = body.chars().take(500).collect();
            debug!(%preview, "response does not appear to be XML");
            return Err(FetchError::NotXml);
        }

        Ok(xml_extractor::extract(&body)?)
    }

    /// Fetch one page starting after `marker` and project its entries onto
    /// `child_tags`.
    #[instrument(skip(self, child_tags))]
    pub async fn fetch_page(
        &self,
        bucket_url: &str,
        max_keys: u32,
        marker: Option<&str>,
        child_tags: &[String],
    ) -> FetchResult<Page> {
        let url = page_url(bucket_url, max_keys, marker);
        let mut request = self.client.get(&url);
        if let Some(timeout) = self.config.page_timeout {
            request = request.timeout(timeout);
        }
        let body = self.send(&url, request, self.config.page_timeout).await?;
        let extraction = xml_extractor::extract(&body)?;

        let files = extraction
            .contents
            .iter()
            .map(|contents| NewFile::from_contents(contents, child_tags, bucket_url))
            .collect::<Vec<_>>();
        debug!(files = files.len(), next_marker = ?extraction.next_marker, "fetched page");

        Ok(Page {
            files,
            next_marker: extraction.next_marker,
            is_truncated: extraction.is_truncated,
            has_more_pages_indicated: extraction.has_more_pages_indicated,
        })
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        timeout: Option<Duration>,
    ) -> FetchResult<String> {
        let classify = |source: reqwest::Error| match timeout {
            Some(timeout) if source.is_timeout() => FetchError::Timeout {
                url: url.to_string(),
                timeout,
            },
            _ => FetchError::Network {
                url: url.to_string(),
                source,
            },
        };

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        debug!(%url, status = status.as_u16(), "listing response received");

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = response.text().await.map_err(classify)?;
        if body.is_empty() {
            return Err(FetchError::EmptyResponse);
        }
        Ok(body)
    }
}

/// `bucket_url?max-keys=N[&marker=M]`, with the marker percent-encoded.
pub fn page_url(bucket_url: &str, max_keys: u32, marker: Option<&str>) -> String {
    match marker.filter(|m| !m.is_empty()) {
        Some(marker) => format!(
            "{}?max-keys={}&marker={}",
            bucket_url,
            max_keys,
            urlencoding::encode(marker)
        ),
        None => format!("{}?max-keys={}", bucket_url, max_keys),
    }
}

fn looks_like_listing(body: &str) -> bool {
    body.contains("<?xml") || body.contains("<ListBucketResult") || body.contains("<Contents")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_without_marker() {
        assert_eq!(
            page_url("https://example.com/bucket/", 1000, None),
            "https://example.com/bucket/?max-keys=1000"
        );
        assert_eq!(
            page_url("https://example.com/bucket/", 50, Some("")),
            "https://example.com/bucket/?max-keys=50"
        );
    }

    #[test]
    fn page_url_encodes_marker() {
        assert_eq!(
            page_url("https://example.com/", 2, Some("dir/a b&c.txt")),
            "https://example.com/?max-keys=2&marker=dir%2Fa%20b%26c.txt"
        );
    }

    #[test]
    fn client_build_failure_has_its_own_message() {
        let source = Client::builder()
            .user_agent("bad\nagent")
            .build()
            .unwrap_err();
        let err = FetchError::Client(source);
        assert!(err.to_string().starts_with("could not build HTTP client"));
    }

    #[test]
    fn listing_sniffing() {
        assert!(looks_like_listing("<?xml version=\"1.0\"?><x/>"));
        assert!(looks_like_listing("<ListBucketResult></ListBucketResult>"));
        assert!(looks_like_listing("<Contents><Key>a</Key></Contents>"));
        assert!(!looks_like_listing("<html><body>denied</body></html>"));
    }
}
