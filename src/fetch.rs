use crate::config::IngestConfig;
use crate::{FetchError, FetchResult};
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CACHE_CONTROL, PRAGMA, USER_AGENT};
use std::time::Duration;
use tracing::{debug, warn};

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// How a request for the feed is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMode {
    /// Plain GET asking for CSV.
    Direct,
    /// Browser-like headers with caching disabled, for hosts that reject
    /// bare clients.
    AlternateHeaders,
    /// Same source requested through the configured relay.
    Relay,
}

/// Anything that can hand back the raw CSV text for a url.
pub trait CsvSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str, mode: FetchMode) -> BoxFuture<'a, FetchResult<String>>;
}

/// HTTP fetcher with a per-attempt timeout and linear backoff.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    attempts: u32,
    base_delay: Duration,
    timeout: Duration,
    min_body_bytes: usize,
    relay_template: Option<String>,
}

impl Fetcher {
    pub fn new(config: &IngestConfig) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: reqwest::Client, config: &IngestConfig) -> Self {
        Self {
            http,
            attempts: config.retry_count.max(1),
            base_delay: config.retry_base_delay(),
            timeout: config.request_timeout(),
            min_body_bytes: config.min_body_bytes,
            relay_template: config.proxy_url_template.clone(),
        }
    }

    fn target_url(&self, url: &str, mode: FetchMode) -> FetchResult<String> {
        if mode != FetchMode::Relay {
            return Ok(url.to_string());
        }
        let template = self
            .relay_template
            .as_deref()
            .ok_or(FetchError::RelayUnconfigured)?;
        let encoded = urlencoding::encode(url);
        if template.contains("{url}") {
            Ok(template.replace("{url}", &encoded))
        } else {
            Ok(format!("{template}{encoded}"))
        }
    }

    fn request(&self, url: &str, mode: FetchMode) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match mode {
            FetchMode::Direct | FetchMode::Relay => {
                req.header(ACCEPT, "text/csv, text/plain;q=0.9, */*;q=0.5")
            }
            FetchMode::AlternateHeaders => req
                .header(USER_AGENT, BROWSER_AGENT)
                .header(ACCEPT, "*/*")
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache"),
        }
    }

    async fn exchange(&self, url: &str, mode: FetchMode) -> FetchResult<String> {
        let resp = self.request(url, mode).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let len = body.trim().len();
        if len < self.min_body_bytes {
            return Err(FetchError::BodyTooSmall {
                len,
                min: self.min_body_bytes,
            });
        }
        Ok(body)
    }

    /// One request bounded by the timeout; the in-flight request is dropped
    /// when the timeout fires.
    async fn attempt(&self, url: &str, mode: FetchMode) -> FetchResult<String> {
        tokio::time::timeout(self.timeout, self.exchange(url, mode))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    /// Fetch `url`, retrying every failure kind up to the attempt ceiling.
    /// The delay before attempt `n + 1` is `n * base_delay`.
    pub async fn fetch_text(&self, url: &str, mode: FetchMode) -> FetchResult<String> {
        let target = self.target_url(url, mode)?;
        let mut attempt = 1u32;
        loop {
            match self.attempt(&target, mode).await {
                Ok(body) => {
                    debug!(url = %target, ?mode, attempt, bytes = body.len(), "fetched feed");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(url = %target, ?mode, attempt, error = %e, "fetch attempt failed");
                    if attempt >= self.attempts {
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tokio::time::sleep(self.base_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl CsvSource for Fetcher {
    fn fetch<'a>(&'a self, url: &'a str, mode: FetchMode) -> BoxFuture<'a, FetchResult<String>> {
        Box::pin(self.fetch_text(url, mode))
    }
}

/// In-memory source answering per mode, recording every call.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        bodies: Mutex<HashMap<FetchMode, String>>,
        calls: Mutex<Vec<FetchMode>>,
    }

    impl ScriptedSource {
        pub(crate) fn failing() -> Self {
            Self::default()
        }

        pub(crate) fn serving(mode: FetchMode, body: &str) -> Self {
            let source = Self::default();
            source.serve(mode, body);
            source
        }

        pub(crate) fn serve(&self, mode: FetchMode, body: &str) {
            self.bodies.lock().unwrap().insert(mode, body.to_string());
        }

        pub(crate) fn fail(&self, mode: FetchMode) {
            self.bodies.lock().unwrap().remove(&mode);
        }

        pub(crate) fn calls(&self) -> Vec<FetchMode> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CsvSource for ScriptedSource {
        fn fetch<'a>(
            &'a self,
            _url: &'a str,
            mode: FetchMode,
        ) -> BoxFuture<'a, FetchResult<String>> {
            self.calls.lock().unwrap().push(mode);
            let answer = self.bodies.lock().unwrap().get(&mode).cloned();
            Box::pin(async move { answer.ok_or(FetchError::Status(503)) })
        }
    }
}
