#[cfg(test)]
use std::sync::Mutex;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use tracing::{debug, info, instrument, warn};

/// How long a discovered base URL is trusted without re-running discovery.
/// Also keeps crt.sh queries down to one per window.
pub const CACHE_TTL_HOURS: i64 = 12;

#[must_use]
pub fn cache_ttl() -> TimeDelta {
    TimeDelta::hours(CACHE_TTL_HOURS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub base_url: String,
    /// When `base_url` was last confirmed working
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub discovered_at: DateTime<Utc>,
}

/// Accepts RFC 3339 strings as well as Unix epoch seconds (integer or fractional)
fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Rfc3339(DateTime<Utc>),
        EpochSeconds(i64),
        EpochFractional(f64),
    }

    let ts = match Timestamp::deserialize(d)? {
        Timestamp::Rfc3339(t) => Some(t),
        Timestamp::EpochSeconds(s) => DateTime::from_timestamp(s, 0),
        #[allow(clippy::cast_possible_truncation)]
        Timestamp::EpochFractional(s) => DateTime::from_timestamp_millis((s * 1000.0) as i64),
    };
    ts.ok_or_else(|| D::Error::custom("timestamp out of range"))
}

impl CacheRecord {
    /// A record stamped in the future is treated as stale, it cannot have been confirmed yet
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.discovered_at);
        age >= TimeDelta::zero() && age < cache_ttl()
    }
}

/// Persistence handle for the single cached record
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet
    async fn load(&self) -> Result<Option<CacheRecord>>;
    /// Replaces the stored record entirely
    async fn save(&self, record: &CacheRecord) -> Result<()>;
}

/// Stores the record as a JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheStore for JsonFileStore {
    async fn load(&self) -> Result<Option<CacheRecord>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Reading cache file {:?}", self.path));
            }
        };

        let record = serde_json::from_slice::<CacheRecord>(&data)
            .with_context(|| format!("Parsing cache file {:?}", self.path))?;
        Ok(Some(record))
    }

    /// Writes to a sibling temporary file first and renames it over the old one,
    /// so an interrupted run never leaves a truncated cache behind
    async fn save(&self, record: &CacheRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Creating cache directory {parent:?}"))?;
        }

        let json = serde_json::to_vec_pretty(record).context("Serializing cache record")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Writing temporary cache file {tmp:?}"))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Replacing cache file {:?}", self.path))?;
        Ok(())
    }
}

/// Keeps the record in memory only
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<CacheRecord>>,
    writes: Mutex<usize>,
}

#[cfg(test)]
impl MemoryStore {
    #[must_use]
    pub fn with_record(record: CacheRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            writes: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn record(&self) -> Option<CacheRecord> {
        self.record.lock().ok().and_then(|r| r.clone())
    }

    /// Number of successful [`CacheStore::save`] calls
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.lock().map_or(0, |w| *w)
    }
}

#[cfg(test)]
#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self) -> Result<Option<CacheRecord>> {
        Ok(self.record())
    }

    async fn save(&self, record: &CacheRecord) -> Result<()> {
        let mut slot = self
            .record
            .lock()
            .map_err(|_| anyhow::anyhow!("Cache record lock poisoned"))?;
        *slot = Some(record.clone());
        if let Ok(mut w) = self.writes.lock() {
            *w += 1;
        }
        Ok(())
    }
}

/// Time-bounded view over a [`CacheStore`]
pub struct DiscoveryCache<S> {
    store: S,
}

impl<S: CacheStore> DiscoveryCache<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the stored record if it is younger than [`cache_ttl`] at `now`.
    /// Unreadable or corrupt caches count as a miss.
    #[instrument(skip(self))]
    pub async fn read(&self, now: DateTime<Utc>) -> Option<CacheRecord> {
        let record = match self.store.load().await {
            Ok(Some(r)) => r,
            Ok(None) => {
                debug!("No cached base URL");
                return None;
            }
            Err(e) => {
                warn!("Ignoring unreadable discovery cache: {e:#}");
                return None;
            }
        };

        if record.is_fresh(now) {
            Some(record)
        } else {
            info!(
                "Cached base URL {} from {} has expired",
                record.base_url, record.discovered_at
            );
            None
        }
    }

    /// Overwrites the record with `base_url`, stamped with the current time
    ///
    /// # Errors
    /// Errors when the underlying store cannot persist the record
    pub async fn write(&self, base_url: &str) -> Result<CacheRecord> {
        let record = CacheRecord {
            base_url: base_url.to_string(),
            discovered_at: Utc::now(),
        };
        self.store.save(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(base_url: &str, age: TimeDelta) -> CacheRecord {
        CacheRecord {
            base_url: base_url.to_string(),
            discovered_at: Utc::now() - age,
        }
    }

    #[test]
    fn freshness_boundary() {
        let now = Utc::now();
        let at = |age: TimeDelta| CacheRecord {
            base_url: "https://dengetv70.live/".into(),
            discovered_at: now - age,
        };

        assert!(at(TimeDelta::zero()).is_fresh(now));
        assert!(at(TimeDelta::hours(11) + TimeDelta::minutes(59)).is_fresh(now));
        assert!(!at(TimeDelta::hours(12)).is_fresh(now));
        assert!(!at(TimeDelta::days(3)).is_fresh(now));
        assert!(!at(TimeDelta::hours(-1)).is_fresh(now));
    }

    #[test]
    fn json_shape() {
        let record = CacheRecord {
            base_url: "https://dengetv70.live/".into(),
            discovered_at: "2025-01-02T03:04:05Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["baseUrl"], "https://dengetv70.live/");
        assert_eq!(json["discoveredAt"], "2025-01-02T03:04:05Z");
    }

    #[tokio::test]
    async fn read_hits_and_misses() {
        let fresh = DiscoveryCache::new(MemoryStore::with_record(record(
            "https://dengetv70.live/",
            TimeDelta::hours(1),
        )));
        let stale = DiscoveryCache::new(MemoryStore::with_record(record(
            "https://dengetv70.live/",
            TimeDelta::hours(13),
        )));
        let empty = DiscoveryCache::new(MemoryStore::default());

        let now = Utc::now();
        assert_eq!(
            fresh.read(now).await.map(|r| r.base_url).as_deref(),
            Some("https://dengetv70.live/")
        );
        assert!(stale.read(now).await.is_none());
        assert!(empty.read(now).await.is_none());
    }

    #[tokio::test]
    async fn write_stamps_current_time() {
        let cache = DiscoveryCache::new(MemoryStore::default());
        let before = Utc::now();

        let written = cache.write("https://zirvedesin30.sbs/").await.unwrap();

        assert!(written.discovered_at >= before);
        assert_eq!(cache.store().record(), Some(written));
        assert_eq!(cache.store().writes(), 1);
    }

    #[tokio::test]
    async fn file_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let cache = DiscoveryCache::new(JsonFileStore::new(&path));

        assert!(cache.read(Utc::now()).await.is_none());

        cache.write("https://dengetv69.live/").await.unwrap();
        cache.write("https://zirvedesin30.sbs/").await.unwrap();

        let hit = cache.read(Utc::now()).await.unwrap();
        assert_eq!(hit.base_url, "https://zirvedesin30.sbs/");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("dengetv69"));
        assert!(!path.with_file_name("cache.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.load().await.is_err());
        assert!(DiscoveryCache::new(store).read(Utc::now()).await.is_none());
    }

    #[test]
    fn epoch_timestamps_are_accepted() {
        let whole = serde_json::from_str::<CacheRecord>(
            r#"{"baseUrl":"https://dengetv70.live/","discoveredAt":1700000000}"#,
        )
        .unwrap();
        let fractional = serde_json::from_str::<CacheRecord>(
            r#"{"baseUrl":"https://dengetv70.live/","discoveredAt":1700000000.5}"#,
        )
        .unwrap();

        assert_eq!(whole.discovered_at.timestamp(), 1_700_000_000);
        assert_eq!(fractional.discovered_at.timestamp_millis(), 1_700_000_000_500);
    }

    #[tokio::test]
    async fn record_without_timestamp_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"baseUrl":"https://dengetv70.live/"}"#).unwrap();

        let cache = DiscoveryCache::new(JsonFileStore::new(&path));
        assert!(cache.read(Utc::now()).await.is_none());
    }
}
