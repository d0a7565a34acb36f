use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::config::NewsApiConfig;
use crate::timestamp::{self, DATE_FORMAT};

use super::{normalize_records, present, Article, FetchWindow, ProviderKind, Source, UNKNOWN_AUTHOR};

pub const DEFAULT_REQUEST_URL: &str = "https://newsapi.org/v2/everything";

#[derive(Deserialize, Debug)]
struct Response {
    articles: Option<Vec<Value>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Record {
    source: Option<RecordSource>,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RecordSource {
    name: Option<String>,
}

/// The aggregator: a keyword search over many outlets, limited to a date window.
#[derive(Debug, Clone)]
pub struct NewsApi {
    request_url: Url,
    api_key: String,
    query: String,
}

impl NewsApi {
    pub fn from_cfg(cfg: &NewsApiConfig) -> Result<Self> {
        let request_url = match &cfg.request_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_REQUEST_URL).context("invalid default NewsAPI URL")?,
        };

        Ok(Self {
            request_url,
            api_key: cfg.api_key.clone(),
            query: cfg.query.clone(),
        })
    }
}

impl Source for NewsApi {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NewsApi
    }

    fn request_url(&self, window: &FetchWindow) -> Url {
        let format_date = |date: time::Date| date.format(DATE_FORMAT).unwrap_or_default();

        let mut url = self.request_url.clone();
        url.query_pairs_mut()
            .append_pair("q", &self.query)
            .append_pair("from", &format_date(window.from))
            .append_pair("to", &format_date(window.to))
            .append_pair("apiKey", &self.api_key);

        url
    }

    fn normalize(&self, body: &str) -> Result<Vec<Article>, serde_json::Error> {
        let response: Response = serde_json::from_str(body)?;

        Ok(normalize_records(
            self.kind(),
            response.articles.unwrap_or_default(),
            |record: Record| Article {
                url: record.url.unwrap_or_default(),
                title: present(record.title),
                author: present(record.author).or_else(|| Some(UNKNOWN_AUTHOR.into())),
                source: record.source.and_then(|source| present(source.name)),
                category: None,
                description: present(record.description),
                published_at: record
                    .published_at
                    .as_deref()
                    .and_then(timestamp::normalize),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::{date, datetime};

    use super::*;

    fn source() -> NewsApi {
        NewsApi::from_cfg(&NewsApiConfig {
            api_key: "secret".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn builds_a_windowed_search_url() {
        let url = source().request_url(&FetchWindow::ending_on(date!(2025 - 02 - 15)));

        assert_eq!(
            url.as_str(),
            "https://newsapi.org/v2/everything?q=apple&from=2025-02-14&to=2025-02-15&apiKey=secret",
        );
    }

    #[test]
    fn normalizes_articles() {
        let body = json!({
            "status": "ok",
            "totalResults": 2,
            "articles": [
                {
                    "source": { "id": null, "name": "Biztoc.com" },
                    "author": "mlive.com",
                    "title": "Tesla stock finds support, for now",
                    "description": "Tesla's beat-up stock has found support on the charts.",
                    "url": "https://a.example/2",
                    "urlToImage": null,
                    "publishedAt": "2025-02-14T18:07:29Z",
                    "content": "..."
                },
                {
                    "source": { "id": null, "name": "Wired" },
                    "author": null,
                    "title": "Untitled",
                    "description": null,
                    "url": "https://a.example/1",
                    "publishedAt": "not a date"
                }
            ]
        });

        let articles = source().normalize(&body.to_string()).unwrap();

        assert_eq!(
            articles,
            vec![
                Article {
                    url: "https://a.example/2".into(),
                    title: Some("Tesla stock finds support, for now".into()),
                    author: Some("mlive.com".into()),
                    source: Some("Biztoc.com".into()),
                    category: None,
                    description: Some(
                        "Tesla's beat-up stock has found support on the charts.".into()
                    ),
                    published_at: Some(datetime!(2025-02-14 18:07:29)),
                },
                Article {
                    url: "https://a.example/1".into(),
                    title: Some("Untitled".into()),
                    author: Some(UNKNOWN_AUTHOR.into()),
                    source: Some("Wired".into()),
                    category: None,
                    description: None,
                    published_at: None,
                },
            ],
        );
    }

    #[test]
    fn skips_records_without_urls_or_with_wrong_types() {
        let body = json!({
            "articles": [
                { "title": "no url" },
                { "url": "https://a.example/3", "title": 42 },
                { "url": "https://a.example/4" }
            ]
        });

        let articles = source().normalize(&body.to_string()).unwrap();

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://a.example/4");
        assert_eq!(articles[0].author.as_deref(), Some(UNKNOWN_AUTHOR));
    }

    #[test]
    fn error_payloads_yield_no_articles() {
        let body = json!({ "status": "error", "code": "apiKeyInvalid", "message": "..." });

        assert!(source().normalize(&body.to_string()).unwrap().is_empty());
        assert!(source().normalize("<html>").is_err());
    }
}
