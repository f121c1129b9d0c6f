//! Resilient ingestion of a loosely-structured contact CSV feed.
//!
//! - Fetch: HTTP with timeout, linear backoff and alternate transports.
//! - Parse: csv-async under strict and relaxed profiles, then a line-level fallback.
//! - Normalize: alias table mapping variant headers to a canonical [`Contact`].
//! - Cache: durable raw-text snapshot on disk plus an in-memory normalized snapshot.
//!
//! Data shape:
//! - `RawRecord` (header -> value, column order kept) from the parsers
//! - `Contact` from the normalizer, served by [`ContactIngestor::get_contacts`]
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod config;
mod contact;
mod export;
mod fetch;
mod ingest;
mod manual;
mod parse;
mod snapshot;
mod store;

pub use crate::config::{IngestConfig, SourceMode};
pub use crate::contact::{
    format_phone, has_identifying_field, normalize, normalize_header, Contact, RawRecord,
    UNKNOWN_CONTACT,
};
pub use crate::export::{
    export_contacts, export_csv, export_file_name, DirectorySink, ShareSink, EXPORT_COLUMNS,
};
pub use crate::fetch::{CsvSource, FetchMode, Fetcher};
pub use crate::ingest::{ConnectionStatus, ContactIngestor, IngestOutcome, Stage, SAMPLE_CSV};
pub use crate::manual::parse_manual;
pub use crate::parse::{is_valid_record, parse, parse_with_profile, Profile};
pub use crate::snapshot::{Snapshot, SnapshotCache};
pub use crate::store::{CachedPayload, Freshness, LocalCacheStore, Sidecar};

use std::time::Duration;
use thiserror::Error;

/// Failure to retrieve the remote CSV.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("response body too small: {len} bytes (minimum {min})")]
    BodyTooSmall { len: usize, min: usize },
    #[error("no relay url template configured")]
    RelayUnconfigured,
    #[error("fetch failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Failure to turn raw text into records.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("need a header and at least one data line, found {0} line(s)")]
    TooFewLines(usize),
    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
    #[error("{0} profile produced no valid records")]
    NoValidRecords(&'static str),
    #[error("every parse strategy failed; last: {0}")]
    Exhausted(Box<ParseError>),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
}

/// Failure of the durable cache with nothing to fall back on.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached payload and download failed: {0}")]
    NoPayload(#[source] FetchError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sidecar(#[from] serde_json::Error),
}

/// Failure to build or hand off an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv writer failed: {0}")]
    Writer(String),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Any failure of a single ladder stage.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("source mode is local; network stages are disabled")]
    LocalMode,
    #[error("every ingestion stage failed")]
    LadderExhausted,
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type ParseResult<T> = std::result::Result<T, ParseError>;
pub type CacheResult<T> = std::result::Result<T, CacheError>;
