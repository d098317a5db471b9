use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::instrument;

/// Status and body of a completed GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// The single network capability the discovery engine depends on
///
/// Every call is bounded by `timeout`; an `Err` means the request never produced a response
/// (connection failure, TLS error, timeout, undecodable body).
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// [`HttpFetch`] backed by a shared [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    #[instrument(skip(self))]
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let res = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("Requesting {url}"))?;

        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .with_context(|| format!("Reading response body of {url}"))?;

        Ok(FetchResponse { status, body })
    }
}
