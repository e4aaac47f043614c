//! reqwest-backed [`PageFetcher`] for data.gov.in.

use std::time::Duration;

use async_trait::async_trait;

use crate::page::ApiPage;
use crate::{ClientError, PageFetcher, PageRequest};

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.data.gov.in/resource";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("govdata-ingest/", env!("CARGO_PKG_VERSION"));

/// HTTP client for `{base_url}/{resource_id}` endpoints.
#[derive(Debug, Clone)]
pub struct DataGovClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl DataGovClient {
    /// Creates a client.
    ///
    /// An empty API key is not an error: a warning is logged and requests
    /// will be rejected upstream instead.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the underlying HTTP client
    /// cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            log::warn!("data.gov.in API key not configured. Set DATA_GOV_API_KEY");
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    /// Returns the configured base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the URL for a resource.
    #[must_use]
    pub fn resource_url(&self, resource_id: &str) -> String {
        format!("{}/{resource_id}", self.base_url)
    }

    /// Builds the query parameters for one page request.
    #[must_use]
    pub fn query_params(&self, request: &PageRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("api-key".to_string(), self.api_key.clone()),
            ("format".to_string(), "json".to_string()),
            ("limit".to_string(), request.limit.to_string()),
            ("offset".to_string(), request.offset.to_string()),
        ];
        for (field, value) in &request.filters {
            params.push((format!("filters[{field}]"), value.clone()));
        }
        params
    }

    async fn send(&self, resource_id: &str, request: &PageRequest) -> Result<String, ClientError> {
        let response = self
            .http
            .get(self.resource_url(resource_id))
            .query(&self.query_params(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                resource_id: resource_id.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl PageFetcher for DataGovClient {
    async fn fetch_page(
        &self,
        resource_id: &str,
        request: &PageRequest,
    ) -> Result<ApiPage, ClientError> {
        log::debug!(
            "GET {} (limit={}, offset={})",
            self.resource_url(resource_id),
            request.limit,
            request.offset
        );

        let text = tokio::time::timeout(self.timeout, self.send(resource_id, request))
            .await
            .map_err(|_| ClientError::Timeout {
                timeout_ms: self.timeout.as_millis(),
            })??;

        let body: serde_json::Value = serde_json::from_str(&text)?;
        ApiPage::from_json(body)
    }
}
