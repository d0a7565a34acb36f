pub mod guardian;
pub mod news_api;
pub mod nyt;

use std::fmt::{self, Display};

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::{Date, PrimitiveDateTime};
use tracing::warn;

pub use self::guardian::Guardian;
pub use self::news_api::NewsApi;
pub use self::nyt::NewYorkTimes;

pub const UNKNOWN_AUTHOR: &str = "Unknown";
pub const NO_DESCRIPTION: &str = "No description";

/// An article as normalized from a provider response (or submitted through the API).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    NewsApi,
    NewYorkTimes,
    Guardian,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewsApi => "news-api",
            Self::NewYorkTimes => "nyt",
            Self::Guardian => "guardian",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// The date range an aggregator search covers (both ends inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: Date,
    pub to: Date,
}

impl FetchWindow {
    /// Yesterday to `today`.
    pub fn ending_on(today: Date) -> Self {
        Self {
            from: today.previous_day().unwrap_or(today),
            to: today,
        }
    }
}

pub trait Source: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn request_url(&self, window: &FetchWindow) -> Url;

    /// Maps a response body onto articles.
    ///
    /// Fails only if the body as a whole is not a JSON document of the expected shape; individual
    /// malformed records are skipped.
    fn normalize(&self, body: &str) -> Result<Vec<Article>, serde_json::Error>;
}

/// Treats blank strings the same as missing ones.
fn present(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn normalize_records<R, F>(kind: ProviderKind, records: Vec<Value>, map: F) -> Vec<Article>
where
    R: DeserializeOwned,
    F: Fn(R) -> Article,
{
    records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, record)| {
            let idx = idx + 1;
            let record = serde_json::from_value::<R>(record)
                .inspect_err(|e| warn!("Skipping {kind} record #{idx}: could not decode it: {e}"))
                .ok()?;
            let article = map(record);

            if article.url.trim().is_empty() {
                warn!("Skipping {kind} record #{idx}: it has no URL");

                return None;
            }

            Some(article)
        })
        .collect()
}
