use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::timestamp;

use super::{
    normalize_records, present, Article, FetchWindow, ProviderKind, Source, NO_DESCRIPTION,
    UNKNOWN_AUTHOR,
};

pub const DEFAULT_REQUEST_URL: &str = "https://content.guardianapis.com/search";

const SOURCE_NAME: &str = "The Guardian";

// without these the `fields` object is absent from every result.
const SHOW_FIELDS: &str = "byline,trailText";

#[derive(Deserialize, Debug)]
struct Response {
    response: Option<Inner>,
}

#[derive(Deserialize, Debug)]
struct Inner {
    results: Option<Vec<Value>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Record {
    web_url: Option<String>,
    web_title: Option<String>,
    web_publication_date: Option<String>,
    section_name: Option<String>,
    fields: Option<Fields>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Fields {
    byline: Option<String>,
    trail_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Guardian {
    request_url: Url,
    api_key: String,
}

impl Guardian {
    pub fn from_cfg(cfg: &ProviderConfig) -> Result<Self> {
        let request_url = match &cfg.request_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_REQUEST_URL).context("invalid default Guardian API URL")?,
        };

        Ok(Self {
            request_url,
            api_key: cfg.api_key.clone(),
        })
    }
}

impl Source for Guardian {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Guardian
    }

    fn request_url(&self, _window: &FetchWindow) -> Url {
        let mut url = self.request_url.clone();
        url.query_pairs_mut()
            .append_pair("api-key", &self.api_key)
            .append_pair("show-fields", SHOW_FIELDS);

        url
    }

    fn normalize(&self, body: &str) -> Result<Vec<Article>, serde_json::Error> {
        let response: Response = serde_json::from_str(body)?;
        let records = response
            .response
            .and_then(|inner| inner.results)
            .unwrap_or_default();

        Ok(normalize_records(self.kind(), records, |record: Record| {
            let fields = record.fields.unwrap_or_default();

            Article {
                url: record.web_url.unwrap_or_default(),
                title: present(record.web_title),
                author: present(fields.byline).or_else(|| Some(UNKNOWN_AUTHOR.into())),
                source: Some(SOURCE_NAME.into()),
                category: present(record.section_name),
                description: present(fields.trail_text).or_else(|| Some(NO_DESCRIPTION.into())),
                published_at: record
                    .web_publication_date
                    .as_deref()
                    .and_then(timestamp::normalize),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::{date, datetime};

    use super::*;

    fn source() -> Guardian {
        Guardian::from_cfg(&ProviderConfig {
            api_key: "test".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn requests_the_byline_and_trail_text() {
        let url = source().request_url(&FetchWindow::ending_on(date!(2025 - 02 - 15)));

        assert_eq!(
            url.as_str(),
            "https://content.guardianapis.com/search?api-key=test&show-fields=byline%2CtrailText",
        );
    }

    #[test]
    fn reads_nested_results() {
        let body = json!({
            "response": {
                "status": "ok",
                "total": 2,
                "results": [
                    {
                        "id": "world/2025/feb/14/story",
                        "sectionName": "World news",
                        "webPublicationDate": "2025-02-14T09:15:00Z",
                        "webTitle": "A story",
                        "webUrl": "https://www.theguardian.com/world/2025/feb/14/story",
                        "fields": { "byline": "Alex Doe", "trailText": "What happened" }
                    },
                    {
                        "sectionName": "Sport",
                        "webTitle": "Another story",
                        "webUrl": "https://www.theguardian.com/sport/2025/feb/14/other"
                    }
                ]
            }
        });

        let articles = source().normalize(&body.to_string()).unwrap();

        assert_eq!(
            articles[0],
            Article {
                url: "https://www.theguardian.com/world/2025/feb/14/story".into(),
                title: Some("A story".into()),
                author: Some("Alex Doe".into()),
                source: Some("The Guardian".into()),
                category: Some("World news".into()),
                description: Some("What happened".into()),
                published_at: Some(datetime!(2025-02-14 09:15:00)),
            },
        );
        assert_eq!(articles[1].author.as_deref(), Some(UNKNOWN_AUTHOR));
        assert_eq!(articles[1].description.as_deref(), Some(NO_DESCRIPTION));
        assert_eq!(articles[1].published_at, None);
    }

    #[test]
    fn missing_response_yields_no_articles() {
        assert!(source().normalize("{}").unwrap().is_empty());
        assert!(source()
            .normalize(r#"{"response": {"status": "error"}}"#)
            .unwrap()
            .is_empty());
    }
}
