use std::num::NonZeroUsize;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{Discovery, Source, first_valid};
use crate::{manifest::ManifestValidator, util::base_url_for_host};

/// Lowest host index still worth probing; the live host has never been below it
pub const SEQUENTIAL_SEED: u32 = 67;
/// Number of consecutive indices probed per run (`dengetv67.live` ..= `dengetv200.live`)
pub const SEQUENTIAL_SCAN_WIDTH: u32 = 134;

/// Walks the numbered `dengetv<N>.live` host family upwards from a known seed
pub struct SequentialHostProber {
    validator: ManifestValidator,
    seed: u32,
    width: u32,
    parallelism: NonZeroUsize,
}

impl SequentialHostProber {
    #[must_use]
    pub const fn new(validator: ManifestValidator, parallelism: NonZeroUsize) -> Self {
        Self::with_range(validator, SEQUENTIAL_SEED, SEQUENTIAL_SCAN_WIDTH, parallelism)
    }

    #[must_use]
    pub const fn with_range(
        validator: ManifestValidator,
        seed: u32,
        width: u32,
        parallelism: NonZeroUsize,
    ) -> Self {
        Self {
            validator,
            seed,
            width,
            parallelism,
        }
    }

    /// Hosts in probing order, strictly increasing by index
    pub fn hosts(&self) -> impl Iterator<Item = String> + Send + use<> {
        let end = self.seed.saturating_add(self.width);
        (self.seed..end).map(|n| format!("dengetv{n}.live"))
    }
}

#[async_trait]
impl Discovery for SequentialHostProber {
    fn source(&self) -> Source {
        Source::SequentialScan
    }

    #[instrument(skip(self), fields(seed = self.seed, width = self.width))]
    async fn discover(&self) -> Option<String> {
        let base_urls = self.hosts().map(|h| base_url_for_host(&h));
        let found = first_valid(&self.validator, base_urls, self.parallelism).await;
        if found.is_none() {
            info!(
                "No live host between dengetv{}.live and dengetv{}.live",
                self.seed,
                self.seed.saturating_add(self.width).saturating_sub(1)
            );
        }
        found
    }
}
