#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use cache::{DiscoveryCache, JsonFileStore};
use clap::Parser;
use discovery::{CertLogScanner, Discovery, SequentialHostProber};
use http::{HttpFetch, ReqwestFetcher};
use manifest::ManifestValidator;
use resolver::ResolutionOrchestrator;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use util::{init_http_client, spawn_ct_watcher};

pub mod cache;
pub mod discovery;
pub mod http;
pub mod manifest;
pub mod playlist;
pub mod resolver;
pub mod util;

/// Finds the currently live stream host and writes an M3U playlist pointing at it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Where the last discovered base URL is remembered between runs
    #[arg(long, env = "ZIRVE_CACHE_FILE", default_value = "cache.json")]
    cache_file: PathBuf,

    /// Playlist file to (over)write
    #[arg(short, long, env = "ZIRVE_OUTPUT", default_value = "output/dengetv54.m3u")]
    output: PathBuf,

    /// HTTP referrer players should send when fetching streams
    #[arg(long, default_value = "https://dengetv58.live/")]
    referrer: String,

    /// Maximum manifest probes in flight at once
    #[arg(short, long, default_value_t = NonZeroUsize::new(4).expect("4 is non-zero"))]
    parallelism: NonZeroUsize,

    /// Run discovery even when a fresh cached base URL exists
    #[arg(long)]
    ignore_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetcher::new(init_http_client()?));
    let validator = ManifestValidator::new(http.clone());
    let strategies: Vec<Box<dyn Discovery>> = vec![
        Box::new(CertLogScanner::new(
            http,
            validator.clone(),
            args.parallelism,
        )),
        Box::new(SequentialHostProber::new(validator, args.parallelism)),
    ];

    let store = JsonFileStore::new(&args.cache_file);
    info!("Using discovery cache at {:?}", store.path());
    let orchestrator = ResolutionOrchestrator::new(DiscoveryCache::new(store), strategies)
        .ignore_cache(args.ignore_cache);

    let resolved = select! {
        () = ct.cancelled() => bail!("Cancelled before a host was resolved"),
        r = orchestrator.resolve() => r,
    };
    info!("Resolved {} via {}", resolved.base_url, resolved.source);

    playlist::write(&args.output, &resolved.base_url, &args.referrer).await?;
    info!("Playlist written to {:?}", args.output);

    Ok(())
}
