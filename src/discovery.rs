//! Host discovery strategies
//!
//! Each strategy produces candidates in a canonical order and reports the first one whose
//! manifest validates. Probes may overlap (see [`first_valid`]) but the winner is always the
//! earliest candidate in that order, never the fastest responder.

use std::{fmt, num::NonZeroUsize};

use async_trait::async_trait;
use futures_util::{StreamExt as _, stream};

use crate::manifest::ManifestValidator;

pub mod cert_log;
pub mod sequential;

pub use cert_log::CertLogScanner;
pub use sequential::SequentialHostProber;

/// Where a resolved base URL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    CertLog,
    SequentialScan,
    Fallback,
}

impl Source {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::CertLog => "cert-log",
            Self::SequentialScan => "sequential-scan",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Tag reported when this strategy wins
    fn source(&self) -> Source;

    /// Returns the first validated base URL, or `None` when nothing was found.
    /// "Not found" is ordinary control flow, so there is no error channel.
    async fn discover(&self) -> Option<String>;
}

/// Probes `candidates` (base URLs, in canonical order) with up to `parallelism` requests in
/// flight and returns the first one in that order which validates.
///
/// Stops pulling new candidates as soon as the winner is known; probes still in flight are dropped.
pub async fn first_valid<I>(
    validator: &ManifestValidator,
    candidates: I,
    parallelism: NonZeroUsize,
) -> Option<String>
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send,
{
    let probes = stream::iter(candidates)
        .map(move |base_url| async move {
            let ok = validator.validate(&base_url).await;
            (base_url, ok)
        })
        .buffered(parallelism.get());
    futures_util::pin_mut!(probes);

    while let Some((base_url, ok)) = probes.next().await {
        if ok {
            return Some(base_url);
        }
    }
    None
}
