use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{Discovery, Source, first_valid};
use crate::{http::HttpFetch, manifest::ManifestValidator, util::base_url_for_host};

pub const CERT_LOG_ENDPOINT: &str = "https://crt.sh/";
/// `LIKE` pattern understood by crt.sh, `%` being its wildcard
pub const CERT_LOG_QUERY: &str = "%zirvedesin%";
/// crt.sh is slow on wildcard queries
pub const CERT_LOG_TIMEOUT: Duration = Duration::from_secs(20);

pub static CANDIDATE_HOST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9-]+\.)*zirvedesin[0-9]+\.sbs$").expect("static regex is valid")
});

/// The subset of a crt.sh JSON record we care about
#[derive(Debug, Clone, Default, Deserialize)]
struct CertRecord {
    #[serde(default)]
    common_name: Option<String>,
    /// Newline separated subject alternative names
    #[serde(default)]
    name_value: Option<String>,
}

/// Finds freshly certified hosts through the crt.sh Certificate Transparency search
pub struct CertLogScanner {
    http: Arc<dyn HttpFetch>,
    validator: ManifestValidator,
    parallelism: NonZeroUsize,
}

impl CertLogScanner {
    #[must_use]
    pub fn new(
        http: Arc<dyn HttpFetch>,
        validator: ManifestValidator,
        parallelism: NonZeroUsize,
    ) -> Self {
        Self {
            http,
            validator,
            parallelism,
        }
    }

    /// Queries the log once and returns the unique candidate hosts in response order.
    /// Any failure yields an empty list.
    #[instrument(skip(self))]
    pub async fn candidates(&self) -> Vec<String> {
        match self.fetch_records().await {
            Ok(records) => {
                let hosts = extract_hosts(&records);
                info!(
                    "Certificate log returned {} records, {} candidate hosts",
                    records.len(),
                    hosts.len()
                );
                hosts
            }
            Err(e) => {
                warn!("Certificate log query failed: {e:#}");
                Vec::new()
            }
        }
    }

    async fn fetch_records(&self) -> Result<Vec<CertRecord>> {
        let url = query_url();
        let res = self.http.get(url.as_str(), CERT_LOG_TIMEOUT).await?;
        ensure!(
            res.is_success(),
            "crt.sh answered with HTTP {} (rate limited?)",
            res.status
        );

        serde_json::from_str::<Vec<CertRecord>>(&res.body).context("Parsing crt.sh response")
    }
}

#[async_trait]
impl Discovery for CertLogScanner {
    fn source(&self) -> Source {
        Source::CertLog
    }

    async fn discover(&self) -> Option<String> {
        let hosts = self.candidates().await;
        let base_urls = hosts
            .iter()
            .map(|h| base_url_for_host(h))
            .collect::<Vec<String>>();

        first_valid(&self.validator, base_urls, self.parallelism).await
    }
}

#[must_use]
pub fn query_url() -> Url {
    let mut url = Url::parse(CERT_LOG_ENDPOINT).expect("static URL is valid");
    url.query_pairs_mut()
        .append_pair("q", CERT_LOG_QUERY)
        .append_pair("output", "json");
    url
}

/// Normalises a certificate name into a candidate host, if it belongs to the host family
fn candidate_host(name: &str) -> Option<String> {
    let name = name.trim().to_ascii_lowercase();
    let name = name.strip_prefix("*.").unwrap_or(&name);
    CANDIDATE_HOST_REGEX
        .is_match(name)
        .then(|| name.to_string())
}

/// Collects unique candidate hosts, keeping the position of their first occurrence
fn extract_hosts(records: &[CertRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();

    for record in records {
        let names = record
            .name_value
            .iter()
            .flat_map(|v| v.lines())
            .chain(record.common_name.as_deref());

        for host in names.filter_map(candidate_host) {
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
    }

    hosts
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::testing::ScriptedFetcher;

    fn scanner(fetcher: &ScriptedFetcher) -> CertLogScanner {
        let http: Arc<dyn HttpFetch> = Arc::new(fetcher.clone());
        CertLogScanner::new(
            http.clone(),
            ManifestValidator::new(http),
            NonZeroUsize::MIN,
        )
    }

    fn crt_response(names: &[&str]) -> String {
        let records = names
            .iter()
            .enumerate()
            .map(|(i, n)| json!({ "id": 1000 - i, "common_name": n, "name_value": n }))
            .collect::<Vec<_>>();
        serde_json::Value::Array(records).to_string()
    }

    #[test]
    fn query_url_is_encoded() {
        assert_eq!(
            query_url().as_str(),
            "https://crt.sh/?q=%25zirvedesin%25&output=json"
        );
    }

    #[test]
    fn candidate_host_normalisation() {
        assert_eq!(
            candidate_host("*.zirvedesin13.sbs").as_deref(),
            Some("zirvedesin13.sbs")
        );
        assert_eq!(
            candidate_host(" Tible.ZirveDesin13.sbs ").as_deref(),
            Some("tible.zirvedesin13.sbs")
        );
        assert_eq!(candidate_host("zirvedesin.sbs"), None);
        assert_eq!(candidate_host("zirvedesin13.sbs.evil.com"), None);
        assert_eq!(candidate_host("zirvedesin13.com"), None);
    }

    #[test]
    fn hosts_are_deduplicated_in_first_seen_order() {
        let records = vec![
            CertRecord {
                common_name: Some("zirvedesin22.sbs".into()),
                name_value: Some("zirvedesin22.sbs\n*.zirvedesin22.sbs".into()),
            },
            CertRecord {
                common_name: Some("zirvedesin30.sbs".into()),
                name_value: Some("zirvedesin30.sbs\ntible.zirvedesin30.sbs".into()),
            },
            CertRecord {
                common_name: Some("zirvedesin22.sbs".into()),
                name_value: None,
            },
            CertRecord {
                common_name: Some("unrelated.example".into()),
                name_value: None,
            },
        ];

        assert_eq!(
            extract_hosts(&records),
            vec![
                "zirvedesin22.sbs".to_string(),
                "zirvedesin30.sbs".to_string(),
                "tible.zirvedesin30.sbs".to_string(),
            ]
        );
    }

    #[test]
    fn tolerates_missing_and_extra_fields() {
        let body = r#"[{"id": 1, "issuer_name": "C=US"}, {"common_name": null, "name_value": "zirvedesin5.sbs"}]"#;
        let records = serde_json::from_str::<Vec<CertRecord>>(body).unwrap();
        assert_eq!(extract_hosts(&records), vec!["zirvedesin5.sbs".to_string()]);
    }

    #[tokio::test]
    async fn first_validating_candidate_wins() {
        let fetcher = ScriptedFetcher::new()
            .respond(
                query_url().as_str(),
                200,
                &crt_response(&["zirvedesin22.sbs", "zirvedesin22.sbs", "zirvedesin30.sbs"]),
            )
            .serve_manifest("https://zirvedesin30.sbs/");

        let found = scanner(&fetcher).discover().await;

        assert_eq!(found.as_deref(), Some("https://zirvedesin30.sbs/"));
        // One log query, the duplicate is probed only once
        assert_eq!(fetcher.calls_matching("crt.sh").len(), 1);
        assert_eq!(
            fetcher.calls_matching("zirvedesin22.sbs/yayinzirve.m3u8").len(),
            1
        );
    }

    #[tokio::test]
    async fn rate_limited_log_yields_nothing() {
        let fetcher = ScriptedFetcher::new().respond(query_url().as_str(), 429, "Too Many Requests");
        let s = scanner(&fetcher);
        assert!(s.candidates().await.is_empty());
        assert!(s.discover().await.is_none());
        // Only the log itself was contacted
        assert!(fetcher.calls().iter().all(|c| c.contains("crt.sh")));
    }

    #[tokio::test]
    async fn malformed_json_yields_nothing() {
        let fetcher =
            ScriptedFetcher::new().respond(query_url().as_str(), 200, "<html>502 Bad Gateway</html>");
        assert!(scanner(&fetcher).discover().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_log_yields_nothing() {
        let fetcher = ScriptedFetcher::new();
        assert!(scanner(&fetcher).discover().await.is_none());
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn no_candidate_validates() {
        let fetcher = ScriptedFetcher::new().respond(
            query_url().as_str(),
            200,
            &crt_response(&["zirvedesin1.sbs", "zirvedesin2.sbs"]),
        );
        assert!(scanner(&fetcher).discover().await.is_none());
        assert_eq!(fetcher.calls().len(), 3);
    }
}
