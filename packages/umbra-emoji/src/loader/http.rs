//! Conditional JSON fetches over HTTP.

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;

use crate::error::{Error, Result};

/// Result of a conditional GET
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// HTTP 304, the stored copy is current
    NotModified,
    /// A fresh payload
    Fetched {
        /// Decoded JSON body
        body: serde_json::Value,
        /// ETag sent with the payload, if any
        etag: Option<String>,
    },
}

/// Source of emoji datasets.
///
/// Implementations send `If-None-Match` when `etag` is given, map 304 to
/// [`FetchOutcome::NotModified`], and fail with [`Error::HttpStatus`] on any
/// other non-success status. They never retry.
#[async_trait]
pub trait EmojiFetcher: Send + Sync {
    /// GET `url` as JSON
    async fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome>;
}

/// [`EmojiFetcher`] on a `reqwest` client
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher on an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EmojiFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("{} not modified", url);
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.json::<serde_json::Value>().await?;

        Ok(FetchOutcome::Fetched { body, etag })
    }
}
