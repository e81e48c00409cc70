//! Content retrieval for summarization.
//!
//! Stored content is obtained through an ordered list of stages. Each stage
//! either yields the bytes or reports why it could not; the first success
//! wins and, when every stage fails, all failures are returned together.
//!
//! | Stage | Source |
//! |-------|--------|
//! | [`RetrievalStage::SessionCache`] | bytes kept from this session's upload |
//! | [`RetrievalStage::Direct`] | the file's durable URL |
//! | [`RetrievalStage::Proxy`] | the durable URL through a relay (`{proxy}?url=...`) |

use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const RETRIEVAL_POLICY: [RetrievalStage; 3] = [
    RetrievalStage::SessionCache,
    RetrievalStage::Direct,
    RetrievalStage::Proxy,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    SessionCache,
    Direct,
    Proxy,
}

impl fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalStage::SessionCache => "session cache",
            RetrievalStage::Direct => "direct",
            RetrievalStage::Proxy => "proxy",
        })
    }
}

/// Why a single stage produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    #[error("not cached")]
    NotCached,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("disabled")]
    Disabled,
}

/// Every stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not retrieve {url}: {}", summarize_failures(.failures))]
pub struct RetrievalError {
    pub url: String,
    pub failures: Vec<(RetrievalStage, StageFailure)>,
}

fn summarize_failures(failures: &[(RetrievalStage, StageFailure)]) -> String {
    failures
        .iter()
        .map(|(stage, failure)| format!("{} ({})", stage, failure))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fetches the bytes behind a URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StageFailure>;
}

/// Runs [`RETRIEVAL_POLICY`] against a fetcher.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    proxy_base: Option<String>,
}

impl Retrieval {
    pub fn new(proxy_base: Option<&str>) -> Self {
        Self {
            proxy_base: proxy_base.map(str::to_string),
        }
    }

    /// The relay URL for `url`, or `None` when the proxy stage cannot apply.
    pub fn proxied(&self, url: &str) -> Option<String> {
        if url.starts_with("file:") {
            return None;
        }
        let mut relay = Url::parse(self.proxy_base.as_deref()?).ok()?;
        relay.query_pairs_mut().append_pair("url", url);
        Some(relay.to_string())
    }

    pub async fn retrieve(
        &self,
        fetcher: &dyn ContentFetcher,
        cached: Option<&[u8]>,
        url: &str,
    ) -> Result<Vec<u8>, RetrievalError> {
        let mut failures = Vec::new();

        for stage in RETRIEVAL_POLICY {
            let attempt = match stage {
                RetrievalStage::SessionCache => {
                    cached.map(<[u8]>::to_vec).ok_or(StageFailure::NotCached)
                }
                RetrievalStage::Direct => fetcher.fetch(url).await,
                RetrievalStage::Proxy => match self.proxied(url) {
                    Some(relay) => fetcher.fetch(&relay).await,
                    None => Err(StageFailure::Disabled),
                },
            };

            match attempt {
                Ok(bytes) => {
                    debug!(%stage, url, size = bytes.len(), "content retrieved");
                    return Ok(bytes);
                }
                Err(failure) => {
                    debug!(%stage, url, %failure, "retrieval stage failed");
                    failures.push((stage, failure));
                }
            }
        }

        Err(RetrievalError {
            url: url.to_string(),
            failures,
        })
    }
}

/// Fetches `http(s)://` URLs with reqwest and reads `file://` URLs from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StageFailure> {
        let parsed = Url::parse(url).map_err(|e| StageFailure::Transport(e.to_string()))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| StageFailure::Transport(format!("invalid file URL: {}", url)))?;
            return tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StageFailure::Status(404),
                _ => StageFailure::Transport(e.to_string()),
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| StageFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageFailure::Status(status.as_u16()));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| StageFailure::Transport(e.to_string()))
    }
}
