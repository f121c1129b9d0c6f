use crate::config::{IngestConfig, SourceMode};
use crate::contact::{normalize, Contact};
use crate::fetch::{CsvSource, FetchMode, Fetcher};
use crate::parse::parse;
use crate::snapshot::SnapshotCache;
use crate::store::{Freshness, LocalCacheStore};
use crate::{FetchResult, IngestError};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Contacts served when every other source is unavailable.
pub const SAMPLE_CSV: &str = include_str!("../data/sample_contacts.csv");

/// One rung of the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Direct fetch of the source url.
    Network,
    /// Durable cache, which may itself download.
    LocalCache,
    /// Direct fetch with browser-like headers.
    AlternateHeaders,
    /// Fetch through the relay template.
    Relay,
    /// Bundled sample data.
    Sample,
}

impl Stage {
    /// The full ladder for a source mode, most preferred first.
    pub fn ladder(mode: SourceMode) -> Vec<Stage> {
        match mode {
            SourceMode::Remote => vec![
                Stage::Network,
                Stage::LocalCache,
                Stage::AlternateHeaders,
                Stage::Relay,
                Stage::Sample,
            ],
            SourceMode::Local => vec![Stage::Sample],
        }
    }
}

/// Connection state a display layer can show without knowing the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
    Offline,
    NoData,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Offline => "offline",
            ConnectionStatus::NoData => "no-data",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one `load`.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub contacts: Arc<Vec<Contact>>,
    /// Ladder stage that produced the contacts; `None` when they came from
    /// the in-memory snapshot.
    pub stage: Option<Stage>,
    pub status: ConnectionStatus,
}

/// Owns the fallback ladder and both cache layers.
pub struct ContactIngestor {
    url: String,
    mode: SourceMode,
    ladder: Vec<Stage>,
    source: Arc<dyn CsvSource>,
    store: LocalCacheStore,
    snapshot: SnapshotCache,
    status: RwLock<ConnectionStatus>,
}

impl ContactIngestor {
    /// Ingestor backed by the HTTP [`Fetcher`].
    pub fn new(config: &IngestConfig) -> FetchResult<Self> {
        let fetcher = Fetcher::new(config)?;
        Ok(Self::with_source(config, Arc::new(fetcher)))
    }

    pub fn with_source(config: &IngestConfig, source: Arc<dyn CsvSource>) -> Self {
        Self {
            url: config.source_url.clone(),
            mode: config.mode,
            ladder: Stage::ladder(config.mode),
            store: LocalCacheStore::from_config(config, source.clone()),
            source,
            snapshot: SnapshotCache::new(config.memory_cache_ttl()),
            status: RwLock::new(ConnectionStatus::Connecting),
        }
    }

    /// Replace the ladder, e.g. to drop the relay stage.
    pub fn with_ladder(mut self, ladder: Vec<Stage>) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn ladder(&self) -> &[Stage] {
        &self.ladder
    }

    pub fn store(&self) -> &LocalCacheStore {
        &self.store
    }

    pub fn snapshot(&self) -> &SnapshotCache {
        &self.snapshot
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Drop the in-memory snapshot; the durable cache is untouched.
    pub fn invalidate(&self) {
        self.snapshot.invalidate();
    }

    /// Contacts for display. Never fails: falls back down the ladder, then
    /// to the last snapshot, then to sample data.
    pub async fn get_contacts(&self, force_refresh: bool) -> Arc<Vec<Contact>> {
        self.load(force_refresh).await.contacts
    }

    /// Like [`get_contacts`](Self::get_contacts), also reporting where the
    /// contacts came from.
    pub async fn load(&self, force_refresh: bool) -> IngestOutcome {
        if !force_refresh {
            if let Some(snapshot) = self.snapshot.get() {
                debug!(contacts = snapshot.contacts.len(), "serving memory snapshot");
                return IngestOutcome {
                    contacts: snapshot.contacts.clone(),
                    stage: None,
                    status: snapshot.status,
                };
            }
        }

        self.set_status(ConnectionStatus::Connecting);
        let outcome = match self.run_ladder().await {
            Ok((stage, status, contacts)) => {
                let status = if contacts.is_empty() {
                    ConnectionStatus::NoData
                } else {
                    status
                };
                let snapshot = self.snapshot.set(contacts, status);
                IngestOutcome {
                    contacts: snapshot.contacts.clone(),
                    stage: Some(stage),
                    status,
                }
            }
            Err(e) => self.last_resort(e).await,
        };
        self.set_status(outcome.status);
        outcome
    }

    async fn last_resort(&self, err: IngestError) -> IngestOutcome {
        if let Some(previous) = self.snapshot.get_any() {
            warn!(error = %err, age = ?previous.age(), "ladder failed, serving previous snapshot");
            return IngestOutcome {
                contacts: previous.contacts.clone(),
                stage: None,
                status: ConnectionStatus::Offline,
            };
        }
        warn!(error = %err, "ladder failed, serving sample data");
        let contacts = match parse_contacts(SAMPLE_CSV).await {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!(error = %e, "sample data unusable");
                Vec::new()
            }
        };
        let status = if contacts.is_empty() {
            ConnectionStatus::NoData
        } else {
            ConnectionStatus::Error
        };
        IngestOutcome {
            contacts: Arc::new(contacts),
            stage: Some(Stage::Sample),
            status,
        }
    }

    async fn run_ladder(&self) -> Result<(Stage, ConnectionStatus, Vec<Contact>), IngestError> {
        for &stage in &self.ladder {
            match self.run_stage(stage).await {
                Ok((status, contacts)) => {
                    info!(?stage, %status, contacts = contacts.len(), "ingestion stage succeeded");
                    return Ok((stage, status, contacts));
                }
                Err(e) => warn!(?stage, error = %e, "ingestion stage failed"),
            }
        }
        Err(IngestError::LadderExhausted)
    }

    async fn run_stage(&self, stage: Stage) -> Result<(ConnectionStatus, Vec<Contact>), IngestError> {
        let acquired = self.acquire(stage).await?;
        let contacts = parse_contacts(&acquired.raw).await?;
        if acquired.fresh_download {
            if let Err(e) = self.store.store(&acquired.raw).await {
                warn!(?stage, error = %e, "could not refresh durable cache");
            }
        }
        Ok((acquired.status, contacts))
    }

    async fn acquire(&self, stage: Stage) -> Result<Acquired, IngestError> {
        let fetch_mode = match stage {
            Stage::Network => FetchMode::Direct,
            Stage::AlternateHeaders => FetchMode::AlternateHeaders,
            Stage::Relay => FetchMode::Relay,
            Stage::LocalCache => {
                if self.mode == SourceMode::Local {
                    return Err(IngestError::LocalMode);
                }
                let payload = self.store.read_or_download().await?;
                let status = match payload.freshness {
                    Freshness::Cached | Freshness::Downloaded => ConnectionStatus::Connected,
                    Freshness::Stale => ConnectionStatus::Offline,
                };
                return Ok(Acquired {
                    raw: payload.text,
                    status,
                    fresh_download: payload.freshness == Freshness::Downloaded,
                });
            }
            Stage::Sample => {
                let status = match self.mode {
                    SourceMode::Local => ConnectionStatus::Connected,
                    SourceMode::Remote => ConnectionStatus::Error,
                };
                return Ok(Acquired {
                    raw: SAMPLE_CSV.to_string(),
                    status,
                    fresh_download: false,
                });
            }
        };
        if self.mode == SourceMode::Local {
            return Err(IngestError::LocalMode);
        }
        let raw = self.source.fetch(&self.url, fetch_mode).await?;
        Ok(Acquired {
            raw,
            status: ConnectionStatus::Connected,
            fresh_download: true,
        })
    }

    /// Force a refresh every `every`, starting one interval from now.
    pub fn spawn_auto_refresh(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let outcome = self.load(true).await;
                debug!(
                    stage = ?outcome.stage,
                    status = %outcome.status,
                    contacts = outcome.contacts.len(),
                    "auto refresh finished"
                );
            }
        })
    }
}

/// Raw text handed back by one stage.
struct Acquired {
    raw: String,
    status: ConnectionStatus,
    /// Came off the network; persisted once it parses.
    fresh_download: bool,
}

/// Parse, normalize, and keep only meaningful contacts.
async fn parse_contacts(raw: &str) -> Result<Vec<Contact>, IngestError> {
    let records = parse(raw).await?;
    let total = records.len();
    let contacts: Vec<Contact> = records
        .iter()
        .map(normalize)
        .filter(Contact::is_meaningful)
        .collect();
    if contacts.len() < total {
        debug!(dropped = total - contacts.len(), "discarded contacts without identity");
    }
    Ok(contacts)
}
