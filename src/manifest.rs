use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, ensure};
use reqwest::Url;
use tracing::{debug, instrument};

use crate::http::HttpFetch;

/// Manifest every live host is expected to serve, relative to its base URL
pub const MANIFEST_PATH: &str = "yayinzirve.m3u8";
/// First tag of any extended M3U document
pub const MANIFEST_MAGIC: &str = "#EXTM3U";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Judges whether a candidate base URL currently serves a usable media manifest
#[derive(Clone)]
pub struct ManifestValidator {
    http: Arc<dyn HttpFetch>,
}

impl ManifestValidator {
    #[must_use]
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    /// Returns `true` iff `<base_url>/yayinzirve.m3u8` answers 2xx with a parseable M3U8 body.
    ///
    /// Never errors: any failure means the candidate is not viable.
    #[instrument(skip(self))]
    pub async fn validate(&self, base_url: &str) -> bool {
        match self.probe(base_url).await {
            Ok(()) => {
                debug!("Manifest found on {base_url}");
                true
            }
            Err(e) => {
                debug!("{base_url} is not viable: {e:#}");
                false
            }
        }
    }

    async fn probe(&self, base_url: &str) -> Result<()> {
        let url = manifest_url(base_url)?;
        let res = self.http.get(url.as_str(), PROBE_TIMEOUT).await?;
        ensure!(res.is_success(), "HTTP status {}", res.status);
        ensure!(is_manifest(&res.body), "Body is not an M3U8 manifest");
        Ok(())
    }
}

/// Resolves the manifest location below `base_url`
///
/// # Errors
/// Errors when `base_url` is not an absolute URL
pub fn manifest_url(base_url: &str) -> Result<Url> {
    let base = Url::parse(base_url).with_context(|| format!("Parsing base URL {base_url}"))?;
    base.join(MANIFEST_PATH)
        .with_context(|| format!("Joining manifest path onto {base_url}"))
}

fn is_manifest(body: &str) -> bool {
    let body = body.trim_start_matches('\u{feff}').trim_start();
    body.starts_with(MANIFEST_MAGIC) && m3u8_rs::parse_playlist_res(body.as_bytes()).is_ok()
}
