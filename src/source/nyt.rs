use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::timestamp;

use super::{normalize_records, present, Article, FetchWindow, ProviderKind, Source, UNKNOWN_AUTHOR};

pub const DEFAULT_REQUEST_URL: &str = "https://api.nytimes.com/svc/topstories/v2/home.json";

const SOURCE_NAME: &str = "New York Times";

#[derive(Deserialize, Debug)]
struct Response {
    results: Option<Vec<Value>>,
}

#[derive(Deserialize, Debug)]
struct Record {
    url: Option<String>,
    title: Option<String>,
    byline: Option<String>,
    #[serde(rename = "abstract")]
    summary: Option<String>,
    published_date: Option<String>,
    section: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewYorkTimes {
    request_url: Url,
    api_key: String,
}

impl NewYorkTimes {
    pub fn from_cfg(cfg: &ProviderConfig) -> Result<Self> {
        let request_url = match &cfg.request_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_REQUEST_URL).context("invalid default NYT API URL")?,
        };

        Ok(Self {
            request_url,
            api_key: cfg.api_key.clone(),
        })
    }
}

impl Source for NewYorkTimes {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NewYorkTimes
    }

    fn request_url(&self, _window: &FetchWindow) -> Url {
        let mut url = self.request_url.clone();
        url.query_pairs_mut().append_pair("api-key", &self.api_key);

        url
    }

    fn normalize(&self, body: &str) -> Result<Vec<Article>, serde_json::Error> {
        let response: Response = serde_json::from_str(body)?;

        Ok(normalize_records(
            self.kind(),
            response.results.unwrap_or_default(),
            |record: Record| Article {
                url: record.url.unwrap_or_default(),
                title: present(record.title),
                author: present(record.byline).or_else(|| Some(UNKNOWN_AUTHOR.into())),
                source: Some(SOURCE_NAME.into()),
                category: present(record.section),
                description: present(record.summary),
                published_at: record
                    .published_date
                    .as_deref()
                    .and_then(timestamp::normalize),
            },
        ))
    }
}
