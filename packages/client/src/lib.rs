#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! HTTP client for the data.gov.in open-data API.
//!
//! [`PageFetcher`] is the seam the ingestion engine talks to. It has one
//! required method, [`PageFetcher::fetch_page`], and provides the paging
//! loop ([`PageFetcher::fetch_all_pages`]) on top of it, so fakes used in
//! tests page exactly like the real [`DataGovClient`].

pub mod client;
pub mod page;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use govdata_indicator_models::RawRecord;

pub use client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, DataGovClient};
pub use page::ApiPage;

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Default pause between consecutive page requests.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);

/// Resource probed by [`PageFetcher::test_connection`] when none is given.
pub const DEFAULT_PROBE_RESOURCE: &str = "9ef84268-d588-465a-a308-a864a43d0070";

/// Errors that can occur while talking to the upstream API.
///
/// Every variant is treated as transient by the ingestion engine, which
/// retries the whole dataset fetch.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request did not complete within the configured timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout that expired, in milliseconds.
        timeout_ms: u128,
    },

    /// Connection, TLS, or body read failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-success status code.
    #[error("HTTP {status} for resource {resource_id}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Resource that was requested.
        resource_id: String,
    },

    /// The body was JSON but not the expected shape.
    #[error("Invalid response format from data.gov.in: {0}")]
    InvalidResponse(String),

    /// The body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters for a single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of records to return.
    pub limit: u64,
    /// Number of records to skip.
    pub offset: u64,
    /// Field filters, sent as `filters[field]=value`.
    pub filters: BTreeMap<String, String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            filters: BTreeMap::new(),
        }
    }
}

/// Options for [`PageFetcher::fetch_all_pages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    /// Records per page; the offset advances by this much each request.
    pub page_size: u64,
    /// Pause between page requests. Never applied after the last page.
    pub page_delay: Duration,
    /// Field filters applied to every page.
    pub filters: BTreeMap<String, String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
            filters: BTreeMap::new(),
        }
    }
}

/// Source of paginated upstream records.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page of `resource_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on timeout, transport failure, non-success
    /// status, or a malformed body.
    async fn fetch_page(
        &self,
        resource_id: &str,
        request: &PageRequest,
    ) -> Result<ApiPage, ClientError>;

    /// Fetches every page of `resource_id` and concatenates the records.
    ///
    /// Stops when a page returns fewer than `page_size` records or the
    /// accumulated count reaches the reported total. The first page error
    /// is returned as is; retrying is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns the first [`ClientError`] raised by [`Self::fetch_page`].
    async fn fetch_all_pages(
        &self,
        resource_id: &str,
        options: &PageOptions,
    ) -> Result<Vec<RawRecord>, ClientError> {
        let page_size = options.page_size.max(1);
        let mut offset: u64 = 0;
        let mut records: Vec<RawRecord> = Vec::new();

        log::info!("Fetching all pages for resource: {resource_id}");

        loop {
            let request = PageRequest {
                limit: page_size,
                offset,
                filters: options.filters.clone(),
            };
            let page = match self.fetch_page(resource_id, &request).await {
                Ok(page) => page,
                Err(e) => {
                    log::error!("Error fetching page at offset {offset}: {e}");
                    return Err(e);
                }
            };

            log::info!(
                "  fetched {} records (offset: {offset}, total: {})",
                page.count,
                page.total
            );
            records.extend(page.records);

            let accumulated = u64::try_from(records.len()).unwrap_or(u64::MAX);
            if page.count < page_size || accumulated >= page.total {
                break;
            }

            offset += page_size;
            if !options.page_delay.is_zero() {
                tokio::time::sleep(options.page_delay).await;
            }
        }

        log::info!("Completed fetching {} total records", records.len());
        Ok(records)
    }

    /// Probes the API with a single one-record request.
    ///
    /// Returns `false` (and logs why) on any error.
    async fn test_connection(&self, probe_resource_id: &str) -> bool {
        let request = PageRequest {
            limit: 1,
            ..PageRequest::default()
        };
        match self.fetch_page(probe_resource_id, &request).await {
            Ok(_) => {
                log::info!("data.gov.in API connection successful");
                true
            }
            Err(e) => {
                log::error!("data.gov.in API connection failed: {e}");
                false
            }
        }
    }
}
