use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::{
    cache::{CacheStore, DiscoveryCache},
    discovery::{Discovery, Source},
};

/// Used, unvalidated and in this order, when every discovery strategy came up empty
pub const FALLBACK_URLS: [&str; 2] = ["https://tible.zirvedesin13.sbs/", "https://dengetv58.live/"];

/// Outcome of one discovery pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub base_url: String,
    pub source: Source,
}

/// Picks the base URL for this run: cache, then each strategy in order, then the fallback list
pub struct ResolutionOrchestrator<S> {
    cache: DiscoveryCache<S>,
    strategies: Vec<Box<dyn Discovery>>,
    check_cache: bool,
}

impl<S: CacheStore> ResolutionOrchestrator<S> {
    /// `strategies` are attempted in the given order
    pub fn new(cache: DiscoveryCache<S>, strategies: Vec<Box<dyn Discovery>>) -> Self {
        Self {
            cache,
            strategies,
            check_cache: true,
        }
    }

    /// Skips the cache lookup; successful discoveries are still written back
    #[must_use]
    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.check_cache = !ignore;
        self
    }

    #[cfg(test)]
    pub const fn cache(&self) -> &DiscoveryCache<S> {
        &self.cache
    }

    /// Runs one discovery pass. Always produces a URL.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> ResolvedHost {
        if self.check_cache {
            if let Some(record) = self.cache.read(Utc::now()).await {
                info!(
                    "Using cached base URL {} (confirmed {})",
                    record.base_url, record.discovered_at
                );
                return ResolvedHost {
                    base_url: record.base_url,
                    source: Source::Cache,
                };
            }
        }

        for strategy in &self.strategies {
            let source = strategy.source();
            info!("Trying {source} discovery");

            let Some(base_url) = strategy.discover().await else {
                info!("{source} discovery found nothing");
                continue;
            };

            info!("{source} discovery found {base_url}");
            if let Err(e) = self.cache.write(&base_url).await {
                warn!("Unable to cache {base_url}, the next run will rediscover: {e:#}");
            }
            return ResolvedHost { base_url, source };
        }

        let base_url = FALLBACK_URLS[0].to_string();
        warn!("Every discovery strategy failed, falling back to {base_url}");
        ResolvedHost {
            base_url,
            source: Source::Fallback,
        }
    }
}
