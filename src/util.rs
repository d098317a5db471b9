use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Time allowed for establishing a TCP/TLS connection to any host
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the HTTP client shared by every probe and the certificate log query
///
/// # Errors
/// Errors when the TLS backend cannot be initialised
pub fn init_http_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_str(&format!(
            "{}/{} (+{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        ))
        .context("Building User-Agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Unable to build HTTP client")
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal!");
        ct.cancel();
    });
}

/// Turns a bare host name into the base URL form used everywhere else (`https://<host>/`)
#[must_use]
pub fn base_url_for_host(host: &str) -> String {
    format!("https://{host}/")
}
