//! HTTP transport

use crate::error::{FetchError, FetchResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::time::Duration;

/// Status and body of one completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
}

impl FetchResponse {
    /// Only 200 responses are archived and classified
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Something that can GET a request path
///
/// Transport failures come back as [`FetchError`]; any HTTP status, error or
/// not, is an `Ok` response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, path: &str) -> FetchResult<FetchResponse>;
}

/// [`Fetcher`] over a shared reqwest client rooted at a base URL
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    /// Build a client for `base_url` with a per-request timeout
    ///
    /// Responses are transparently decompressed.
    pub fn new(base_url: &str, timeout: Duration) -> FetchResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| FetchError::InvalidPath {
            path: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .http1_only()
            .user_agent(concat!("lobi-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Base URL request paths are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> FetchResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, path: &str) -> FetchResult<FetchResponse> {
        let url = self.url_for(path)?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(path, e))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(path, e))?;

        Ok(FetchResponse { status, body })
    }
}
