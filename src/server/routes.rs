use std::collections::HashMap;

use anyhow::Result as AnyResult;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response, Result};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::Date;
use tracing::info;

use crate::server::convert_errors;
use crate::source::Article;
use crate::state::State as AppState;
use crate::storage::{entities, ArticleFilter, UpdateOutcome};
use crate::timestamp::{self, DATE_FORMAT};

use super::responses::{ArticleNotFound, InvalidField, InvalidPayload, Message, UrlTaken};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Serialize, Debug, Clone)]
pub struct ArticleView {
    id: i64,
    url: String,
    title: Option<String>,
    author: Option<String>,
    source: Option<String>,
    category: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ArticleView {
    fn from_entity(article: entities::Article) -> AnyResult<Self> {
        Ok(Self {
            id: article.id,
            url: article.url,
            title: article.title,
            author: article.author,
            source: article.source,
            category: article.category,
            description: article.description,
            published_at: article.published_at,
            created_at: timestamp::format_utc(article.created_at)?,
            updated_at: timestamp::format_utc(article.updated_at)?,
        })
    }
}

/// An article as submitted by a client. Blank strings count as absent.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ArticlePayload {
    url: Option<String>,
    title: Option<String>,
    author: Option<String>,
    source: Option<String>,
    category: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}

impl ArticlePayload {
    /// Everything but `category` is required. Fields are checked in order and the first failure is
    /// reported.
    fn into_article(self) -> Result<Article, InvalidField> {
        fn required(field: &'static str, value: Option<String>) -> Result<String, InvalidField> {
            non_blank(value).ok_or_else(|| InvalidField::required(field))
        }

        let title = required("title", self.title)?;
        let author = required("author", self.author)?;
        let source = required("source", self.source)?;
        let description = required("description", self.description)?;
        let url = required("url", self.url)?;
        let published_at = required("published_at", self.published_at)?;
        let published_at = timestamp::normalize(&published_at)
            .ok_or_else(|| InvalidField::not_a_date("published_at"))?;

        Ok(Article {
            url,
            title: Some(title),
            author: Some(author),
            source: Some(source),
            category: non_blank(self.category),
            description: Some(description),
            published_at: Some(published_at),
        })
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

fn read_payload(payload: Result<Json<ArticlePayload>, JsonRejection>) -> Result<Article> {
    let Json(payload) = payload.map_err(|e| InvalidPayload {
        message: e.body_text(),
    })?;

    Ok(payload.into_article()?)
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ListQuery {
    search: Option<String>,
    date: Option<String>,
    category: Option<String>,
    source: Option<String>,
    author: Option<String>,
    limit: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<ArticleFilter, InvalidField> {
        let date = non_blank(self.date)
            .map(|raw| {
                Date::parse(&raw, DATE_FORMAT).map_err(|_| InvalidField::not_a_date("date"))
            })
            .transpose()?;

        let limit = match non_blank(self.limit) {
            Some(raw) => raw.parse::<usize>().map_err(|_| InvalidField {
                field: "limit",
                message: "The limit field must be an integer.".into(),
            })?,
            None => DEFAULT_LIMIT,
        };

        Ok(ArticleFilter {
            search: non_blank(self.search),
            date,
            category: non_blank(self.category),
            source: non_blank(self.source),
            author: non_blank(self.author),
            limit: limit.min(MAX_LIMIT),
        })
    }
}

pub async fn list_articles(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Message<Vec<ArticleView>>>> {
    let Query(query) = query.map_err(|e| InvalidPayload {
        message: e.body_text(),
    })?;
    let filter = query.into_filter()?;

    let articles = convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let articles = tx.list_articles(&filter).await?;
        tx.commit().await?;

        articles
            .into_iter()
            .map(ArticleView::from_entity)
            .collect::<AnyResult<Vec<_>>>()
    })
    .await?;

    Ok(Json(Message::with_articles(
        "Articles listed successfully!",
        articles,
    )))
}

pub async fn create_article(
    State(state): State<AppState>,
    payload: Result<Json<ArticlePayload>, JsonRejection>,
) -> Result<Response> {
    let article = read_payload(payload)?;

    let id = convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let id = tx.insert_article(&article).await?;
        tx.commit().await?;

        Ok(id)
    })
    .await?
    .ok_or(UrlTaken)?;

    info!(id, "Created an article");

    Ok((
        StatusCode::CREATED,
        Json(Message::new("Article saved successfully!")),
    )
        .into_response())
}

pub async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Message<ArticleView>>> {
    let article = convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let article = tx.get_article(id).await?;
        tx.commit().await?;

        article.map(ArticleView::from_entity).transpose()
    })
    .await?
    .ok_or(ArticleNotFound)?;

    Ok(Json(Message::with_articles(
        "Article retrieved successfully!",
        article,
    )))
}

pub async fn update_article(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<ArticlePayload>, JsonRejection>,
) -> Result<Json<Message<ArticleView>>> {
    let article = read_payload(payload)?;

    let (outcome, updated) = convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let outcome = tx.update_article(id, &article).await?;
        let updated = match outcome {
            UpdateOutcome::Updated => tx.get_article(id).await?,
            _ => None,
        };
        tx.commit().await?;

        Ok((outcome, updated.map(ArticleView::from_entity).transpose()?))
    })
    .await?;

    match (outcome, updated) {
        (UpdateOutcome::Updated, Some(article)) => Ok(Json(Message::with_articles(
            "Article updated successfully!",
            article,
        ))),
        (UpdateOutcome::UrlTaken, _) => Err(UrlTaken.into()),
        _ => Err(ArticleNotFound.into()),
    }
}

pub async fn delete_article(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Message>> {
    let deleted = convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let deleted = tx.delete_article(id).await?;
        tx.commit().await?;

        Ok(deleted)
    })
    .await?;

    if !deleted {
        return Err(ArticleNotFound.into());
    }

    info!(id, "Deleted an article");

    Ok(Json(Message::new("Article deleted successfully!")))
}

/// Wakes every enabled provider's scheduling task. Returns before any fetch completes.
pub async fn dispatch(State(state): State<AppState>) -> Json<Message> {
    for (kind, provider) in &*state.providers {
        if provider.enabled {
            info!("Dispatching a fetch from {kind}");
            provider.force_update.notify_one();
        }
    }

    Json(Message::new("Job has been dispatched!"))
}

pub async fn list_providers(State(state): State<AppState>) -> Result<Response> {
    #[derive(Serialize, Debug, Clone)]
    struct ProviderStatus {
        name: &'static str,
        enabled: bool,
        last_fetched: Option<String>,
        article_count: i64,
    }

    #[derive(Serialize, Debug, Clone)]
    struct Body {
        providers: Vec<ProviderStatus>,
    }

    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let runs = tx.get_provider_runs().await?;
        tx.commit().await?;

        let runs = runs
            .into_iter()
            .map(|run| (run.name.clone(), run))
            .collect::<HashMap<_, _>>();

        let mut providers = Vec::with_capacity(state.providers.len());

        for (kind, provider) in &*state.providers {
            let run = runs.get(kind.as_str());

            providers.push(ProviderStatus {
                name: kind.as_str(),
                enabled: provider.enabled,
                last_fetched: run
                    .map(|run| timestamp::format_utc(run.last_fetched))
                    .transpose()?,
                article_count: run.map(|run| run.article_count).unwrap_or(0),
            });
        }

        Ok(Json(Body { providers }).into_response())
    })
    .await
}
