use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::request::Parts;
use http_cache_reqwest::{
    CACacheManager, Cache, HttpCache, HttpCacheOptions, MokaCache, MokaManager,
};
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use thiserror::Error;
use tokio::time;
use tracing::{debug, warn};

use crate::config::Config;
use crate::source::{Article, FetchWindow, Source};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters carrying provider API keys.
const KEY_PARAMS: [&str; 2] = ["apiKey", "api-key"];

fn without_api_key(url: &Url) -> Url {
    let kept = url
        .query_pairs()
        .filter(|(name, _)| !KEY_PARAMS.contains(&name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();

    let mut redacted = url.clone();
    redacted.set_query(None);

    if !kept.is_empty() {
        redacted.query_pairs_mut().extend_pairs(kept);
    }

    redacted
}

/// Keys cache entries by method and URL like the default, but leaves API keys out of the on-disk
/// index.
fn cache_key(parts: &Parts) -> String {
    let uri = parts.uri.to_string();

    match Url::parse(&uri) {
        Ok(url) => format!("{}:{}", parts.method, without_api_key(&url)),
        Err(_) => format!("{}:{uri}", parts.method),
    }
}

fn cache_options() -> HttpCacheOptions {
    HttpCacheOptions {
        cache_key: Some(Arc::new(cache_key)),
        ..Default::default()
    }
}

/// Why a provider fetch produced no articles. A provider answering with an empty list is not an
/// error.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("could not reach the provider: {0}")]
    Transport(String),

    #[error("the provider responded with {0}")]
    Status(StatusCode),

    #[error("could not read the response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("the response is not a valid document: {0}")]
    Decode(#[source] serde_json::Error),
}

impl FetchError {
    /// Keeps the message (with its whole cause chain) but drops the API key from the request URL.
    fn transport(e: reqwest_middleware::Error, url: &Url) -> Self {
        let message = format!("{:#}", anyhow::Error::from(e));

        Self::Transport(message.replace(url.as_str(), without_api_key(url).as_str()))
    }

    /// A body cut off mid-transfer counts as a transport failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Body(_) => true,
            Self::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// The delay before retry number `attempt` (starting at 0), doubling each time.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1 << attempt.min(16))
    }
}

#[derive(Clone)]
pub struct Client {
    http: ClientWithMiddleware,
    retry: RetryPolicy,
}

impl Client {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for provider requests");
        }

        let builder = ClientBuilder::new(
            reqwest::Client::builder()
                .user_agent(cfg.user_agent.clone())
                .connect_timeout(CONNECT_TIMEOUT)
                .read_timeout(READ_TIMEOUT)
                .timeout(cfg.request_timeout.into())
                .danger_accept_invalid_certs(cfg.accept_invalid_certs)
                .build()
                .context("could not create an HTTP client")?,
        );

        let builder = if let Some(path) = cfg.cache_dir.clone() {
            debug!("Using a file cache at {}", path.display());
            builder.with(Cache(HttpCache {
                mode: Default::default(),
                manager: CACacheManager { path },
                options: cache_options(),
            }))
        } else {
            debug!("Using an in-memory cache");
            builder.with(Cache(HttpCache {
                mode: Default::default(),
                manager: MokaManager::new(MokaCache::builder().max_capacity(8192).build()),
                options: cache_options(),
            }))
        };

        Ok(Self {
            http: builder.build(),
            retry: RetryPolicy {
                max_retries: cfg.max_retries,
                backoff: cfg.retry_backoff.into(),
            },
        })
    }

    /// Fetches and normalizes one provider's articles, retrying transient failures.
    pub async fn fetch(
        &self,
        source: &dyn Source,
        window: &FetchWindow,
    ) -> Result<Vec<Article>, FetchError> {
        let url = source.request_url(window);
        let mut attempt = 0;

        loop {
            match self.fetch_once(source, &url).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    warn!(
                        "Fetching from {} failed ({e}); retry {attempt}/{} in {}ms",
                        source.kind(),
                        self.retry.max_retries,
                        delay.as_millis(),
                    );
                    time::sleep(delay).await;
                }

                result => return result,
            }
        }
    }

    async fn fetch_once(&self, source: &dyn Source, url: &Url) -> Result<Vec<Article>, FetchError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::transport(e, url))?;

        let status = response.status();

        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.without_url()))?;

        source.normalize(&body).map_err(FetchError::Decode)
    }
}
