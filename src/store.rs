use crate::config::IngestConfig;
use crate::fetch::{CsvSource, FetchMode};
use crate::{CacheError, CacheResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PAYLOAD_FILE: &str = "contacts.csv";
const SIDECAR_FILE: &str = "contacts.meta.json";

/// Metadata written next to the cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Download time, epoch milliseconds.
    pub timestamp: i64,
    /// Payload length in bytes, as a decimal string.
    pub size: String,
    pub url: String,
    /// CRC32 of the payload; absent in sidecars written by older builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
}

impl Sidecar {
    fn describe(text: &str, url: &str) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            size: text.len().to_string(),
            url: url.to_string(),
            checksum: Some(crc32fast::hash(text.as_bytes())),
        }
    }

    /// Sidecar and payload were written together.
    fn matches(&self, text: &str) -> bool {
        self.size == text.len().to_string()
            && self
                .checksum
                .map_or(true, |c| c == crc32fast::hash(text.as_bytes()))
    }

    fn age(&self) -> Option<Duration> {
        let elapsed = Utc::now().timestamp_millis() - self.timestamp;
        u64::try_from(elapsed).ok().map(Duration::from_millis)
    }
}

/// How the returned payload was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from disk inside the freshness window.
    Cached,
    /// Downloaded just now; not yet on disk.
    Downloaded,
    /// Download failed; an older payload was served instead.
    Stale,
}

#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub text: String,
    pub freshness: Freshness,
}

/// Durable single-entry cache of the raw feed text.
///
/// The payload is always renamed into place before its sidecar, and the
/// sidecar records the payload's size and checksum, so a sidecar never
/// vouches for a payload that was not fully written.
pub struct LocalCacheStore {
    dir: PathBuf,
    url: String,
    ttl: Duration,
    source: Arc<dyn CsvSource>,
    write_lock: Mutex<()>,
}

impl LocalCacheStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        url: impl Into<String>,
        ttl: Duration,
        source: Arc<dyn CsvSource>,
    ) -> Self {
        Self {
            dir: dir.into(),
            url: url.into(),
            ttl,
            source,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &IngestConfig, source: Arc<dyn CsvSource>) -> Self {
        Self::new(
            config.cache_dir.clone(),
            config.source_url.clone(),
            config.disk_cache_ttl(),
            source,
        )
    }

    pub fn payload_path(&self) -> PathBuf {
        self.dir.join(PAYLOAD_FILE)
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.dir.join(SIDECAR_FILE)
    }

    /// Current sidecar, if present and readable.
    pub async fn sidecar(&self) -> Option<Sidecar> {
        let raw = match fs::read(self.sidecar_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "cache sidecar unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!(error = %e, "cache sidecar corrupt");
                None
            }
        }
    }

    async fn payload(&self) -> Option<String> {
        match fs::read_to_string(self.payload_path()).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, "cached payload unreadable");
                None
            }
        }
    }

    fn is_fresh(&self, sidecar: &Sidecar, payload: &str) -> bool {
        sidecar.url == self.url
            && sidecar.matches(payload)
            && sidecar.age().is_some_and(|age| age < self.ttl)
    }

    /// Serve the stored payload while fresh, otherwise download.
    /// A failed download falls back to whatever payload is on disk.
    ///
    /// Downloads are not persisted here: the caller hands the text to
    /// [`store`](Self::store) once it has parsed, so an error page served
    /// with a 200 never replaces the last usable payload.
    pub async fn read_or_download(&self) -> CacheResult<CachedPayload> {
        let sidecar = self.sidecar().await;
        let payload = self.payload().await;

        if let (Some(sidecar), Some(text)) = (&sidecar, &payload) {
            if self.is_fresh(sidecar, text) {
                debug!(url = %self.url, bytes = text.len(), "serving cached payload");
                return Ok(CachedPayload {
                    text: text.clone(),
                    freshness: Freshness::Cached,
                });
            }
        }

        match self.source.fetch(&self.url, FetchMode::Direct).await {
            Ok(text) => {
                debug!(url = %self.url, bytes = text.len(), "downloaded payload");
                Ok(CachedPayload {
                    text,
                    freshness: Freshness::Downloaded,
                })
            }
            Err(e) => match payload {
                Some(text) => {
                    warn!(error = %e, bytes = text.len(), "download failed, serving stale payload");
                    Ok(CachedPayload {
                        text,
                        freshness: Freshness::Stale,
                    })
                }
                None => Err(CacheError::NoPayload(e)),
            },
        }
    }

    /// Replace payload and sidecar.
    pub async fn store(&self, text: &str) -> CacheResult<()> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        write_atomic(&self.payload_path(), text.as_bytes()).await?;
        let sidecar = serde_json::to_vec_pretty(&Sidecar::describe(text, &self.url))?;
        write_atomic(&self.sidecar_path(), &sidecar).await?;
        info!(url = %self.url, bytes = text.len(), "cached feed payload");
        Ok(())
    }

    /// Forget the freshness record; the payload stays as a degraded fallback.
    pub async fn invalidate(&self) -> CacheResult<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_present(&self.sidecar_path()).await
    }

    /// Remove both artifacts.
    pub async fn clear(&self) -> CacheResult<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_present(&self.sidecar_path()).await?;
        remove_if_present(&self.payload_path()).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

async fn remove_if_present(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::scripted::ScriptedSource;
    use crate::FetchError;

    const URL: &str = "https://example.com/contacts.csv";
    const OLD: &str = "Name,Email\nOld Timer,old@x.com\n";
    const NEW: &str = "Name,Email\nNew Comer,new@x.com\n";

    fn store(dir: &Path, source: &Arc<ScriptedSource>) -> LocalCacheStore {
        let source: Arc<dyn CsvSource> = source.clone();
        LocalCacheStore::new(dir, URL, Duration::from_secs(600), source)
    }

    async fn seed(dir: &Path, text: &str, age: Duration) {
        let mut sidecar = Sidecar::describe(text, URL);
        sidecar.timestamp -= age.as_millis() as i64;
        fs::write(dir.join(PAYLOAD_FILE), text).await.unwrap();
        fs::write(dir.join(SIDECAR_FILE), serde_json::to_vec(&sidecar).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_payload_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), OLD, Duration::from_secs(60)).await;
        let source = Arc::new(ScriptedSource::serving(FetchMode::Direct, NEW));

        let got = store(dir.path(), &source).read_or_download().await.unwrap();
        assert_eq!(got.freshness, Freshness::Cached);
        assert_eq!(got.text, OLD);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn eleven_minute_old_sidecar_triggers_download() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), OLD, Duration::from_secs(11 * 60)).await;
        let source = Arc::new(ScriptedSource::serving(FetchMode::Direct, NEW));
        let cache = store(dir.path(), &source);

        let got = cache.read_or_download().await.unwrap();
        assert_eq!(got.freshness, Freshness::Downloaded);
        assert_eq!(got.text, NEW);
        assert_eq!(source.calls(), vec![FetchMode::Direct]);

        // nothing on disk changes until the caller accepts the download
        assert_eq!(fs::read_to_string(cache.payload_path()).await.unwrap(), OLD);
        cache.store(&got.text).await.unwrap();
        let sidecar = cache.sidecar().await.unwrap();
        assert_eq!(sidecar.size, NEW.len().to_string());
        assert_eq!(sidecar.url, URL);
        assert!(sidecar.age().unwrap() < Duration::from_secs(60));
        assert_eq!(fs::read_to_string(cache.payload_path()).await.unwrap(), NEW);
    }

    #[tokio::test]
    async fn failed_download_serves_stale_payload() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), OLD, Duration::from_secs(3600)).await;
        let source = Arc::new(ScriptedSource::failing());

        let got = store(dir.path(), &source).read_or_download().await.unwrap();
        assert_eq!(got.freshness, Freshness::Stale);
        assert_eq!(got.text, OLD);
    }

    #[tokio::test]
    async fn nothing_cached_and_no_network_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::failing());

        let err = store(dir.path(), &source).read_or_download().await.unwrap_err();
        assert!(matches!(err, CacheError::NoPayload(FetchError::Status(503))));
    }

    #[tokio::test]
    async fn sidecar_for_another_payload_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), OLD, Duration::from_secs(10)).await;
        // payload replaced without its sidecar
        fs::write(dir.path().join(PAYLOAD_FILE), "Name,Email\nTorn Write,torn@x.com\n")
            .await
            .unwrap();
        let source = Arc::new(ScriptedSource::serving(FetchMode::Direct, NEW));

        let got = store(dir.path(), &source).read_or_download().await.unwrap();
        assert_eq!(got.freshness, Freshness::Downloaded);
    }

    #[tokio::test]
    async fn invalidate_keeps_payload_for_fallback() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), OLD, Duration::from_secs(10)).await;
        let source = Arc::new(ScriptedSource::failing());
        let cache = store(dir.path(), &source);

        cache.invalidate().await.unwrap();
        assert!(cache.sidecar().await.is_none());
        let got = cache.read_or_download().await.unwrap();
        assert_eq!(got.freshness, Freshness::Stale);
        assert_eq!(source.calls().len(), 1);

        cache.clear().await.unwrap();
        assert!(cache.read_or_download().await.is_err());
    }

    #[tokio::test]
    async fn store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("app").join("cache");
        let source: Arc<dyn CsvSource> = Arc::new(ScriptedSource::failing());
        let cache = LocalCacheStore::new(&nested, URL, Duration::from_secs(600), source);

        cache.store(NEW).await.unwrap();
        let sidecar: Sidecar =
            serde_json::from_slice(&fs::read(nested.join(SIDECAR_FILE)).await.unwrap()).unwrap();
        assert!(sidecar.matches(NEW));
        assert!(!nested.join("contacts.tmp").exists());
    }
}
