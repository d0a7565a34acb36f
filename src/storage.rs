pub mod entities;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use time::{Date, OffsetDateTime};
use tracing::{debug, info, instrument};

use crate::source::Article;
use crate::timestamp::{self, DATE_FORMAT};

const ARTICLE_COLUMNS: &str = "id, url, title, author, source, category, description, \
    published_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
    UrlTaken,
}

/// Listing filters. `category`, `source` and `author` are alternatives: an article matches if any
/// of the given ones does.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub search: Option<String>,
    pub date: Option<Date>,
    pub category: Option<String>,
    pub source: Option<String>,
    pub author: Option<String>,
    pub limit: usize,
}

/// Makes `%` and `_` match literally in a LIKE pattern using `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());

    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }

        escaped.push(c);
    }

    escaped
}

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .create_if_missing(true),
            )
            .await
            .with_context(|| anyhow!("could not open a SQLite database `{}`", db_path.display()))?;
        info!("Using an SQLite database `{}`", db_path.display());

        Self::migrate(pool).await
    }

    /// A private database that lives as long as the returned storage.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .context("could not open an in-memory SQLite database")?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .with_context(|| anyhow!("could not prepare a database schema"))?;

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    /// Inserts the article or, if one with the same URL exists, overwrites its fields.
    #[instrument(level = "TRACE", skip_all, fields(url = %article.url))]
    pub async fn upsert_article(&mut self, article: &Article) -> Result<UpsertOutcome> {
        let now = OffsetDateTime::now_utc();
        let published_at = article.published_at.map(timestamp::format).transpose()?;

        let (id, inserted): (i64, bool) = sqlx::query_as(
            "INSERT
            INTO articles (
              url,
              title,
              author,
              source,
              category,
              description,
              published_at,
              created_at,
              updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (url) DO UPDATE SET
              title = excluded.title,
              author = excluded.author,
              source = excluded.source,
              category = excluded.category,
              description = excluded.description,
              published_at = excluded.published_at,
              updated_at = excluded.updated_at
            RETURNING id, created_at = updated_at",
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.author)
        .bind(&article.source)
        .bind(&article.category)
        .bind(&article.description)
        .bind(published_at)
        .bind(now)
        .fetch_one(self.0.as_mut())
        .await
        .context("could not upsert an article")?;

        let outcome = if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };
        debug!(id, ?outcome, "Stored an article");

        Ok(outcome)
    }

    /// Returns the new row's id, or `None` if the URL is already stored.
    #[instrument(level = "TRACE", skip_all, fields(url = %article.url))]
    pub async fn insert_article(&mut self, article: &Article) -> Result<Option<i64>> {
        let now = OffsetDateTime::now_utc();
        let published_at = article.published_at.map(timestamp::format).transpose()?;

        sqlx::query_scalar(
            "INSERT
            INTO articles (
              url,
              title,
              author,
              source,
              category,
              description,
              published_at,
              created_at,
              updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (url) DO NOTHING
            RETURNING id",
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.author)
        .bind(&article.source)
        .bind(&article.category)
        .bind(&article.description)
        .bind(published_at)
        .bind(now)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not insert an article")
    }

    #[instrument(level = "TRACE", skip(self, article))]
    pub async fn update_article(&mut self, id: i64, article: &Article) -> Result<UpdateOutcome> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM articles WHERE id = ?1)")
            .bind(id)
            .fetch_one(self.0.as_mut())
            .await
            .context("could not look up the article")?;

        if !exists {
            return Ok(UpdateOutcome::NotFound);
        }

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM articles WHERE url = ?1 AND id != ?2)",
        )
        .bind(&article.url)
        .bind(id)
        .fetch_one(self.0.as_mut())
        .await
        .context("could not check the article url")?;

        if taken {
            return Ok(UpdateOutcome::UrlTaken);
        }

        let published_at = article.published_at.map(timestamp::format).transpose()?;

        sqlx::query(
            "UPDATE articles
            SET
              url = ?1,
              title = ?2,
              author = ?3,
              source = ?4,
              category = ?5,
              description = ?6,
              published_at = ?7,
              updated_at = ?8
            WHERE id = ?9",
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.author)
        .bind(&article.source)
        .bind(&article.category)
        .bind(&article.description)
        .bind(published_at)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(self.0.as_mut())
        .await
        .context("could not update the article")?;

        Ok(UpdateOutcome::Updated)
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_article(&mut self, id: i64) -> Result<Option<entities::Article>> {
        sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.0.as_mut())
            .await
            .context("could not retrieve the article")
    }

    #[cfg(test)]
    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_article_by_url(&mut self, url: &str) -> Result<Option<entities::Article>> {
        sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1"))
            .bind(url)
            .fetch_optional(self.0.as_mut())
            .await
            .context("could not retrieve the article")
    }

    /// Returns whether a row was deleted.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn delete_article(&mut self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE id = ?1")
            .bind(id)
            .execute(self.0.as_mut())
            .await
            .context("could not delete the article")?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn count_articles(&mut self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(self.0.as_mut())
            .await
            .context("could not count articles")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn list_articles(&mut self, filter: &ArticleFilter) -> Result<Vec<entities::Article>> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1 = 1"));

        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", escape_like(search));
            query
                .push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }

        if let Some(date) = filter.date {
            let date = date
                .format(DATE_FORMAT)
                .with_context(|| anyhow!("could not format the date {date}"))?;
            query.push(" AND date(published_at) = ").push_bind(date);
        }

        let preferences = [
            ("category", &filter.category),
            ("source", &filter.source),
            ("author", &filter.author),
        ]
        .into_iter()
        .filter_map(|(column, value)| Some((column, value.clone()?)))
        .collect::<Vec<_>>();

        if !preferences.is_empty() {
            query.push(" AND (");

            {
                let mut alternatives = query.separated(" OR ");

                for (column, value) in preferences {
                    alternatives
                        .push(format!("{column} = "))
                        .push_bind_unseparated(value);
                }
            }

            query.push(")");
        }

        query
            .push(" ORDER BY published_at IS NULL, published_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit as i64);

        query
            .build_query_as::<entities::Article>()
            .fetch_all(self.0.as_mut())
            .await
            .context("could not list articles")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn record_provider_run(&mut self, name: &str, article_count: usize) -> Result<()> {
        sqlx::query(
            "INSERT
            INTO provider_runs (name, last_fetched, article_count)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO UPDATE SET
              last_fetched = excluded.last_fetched,
              article_count = excluded.article_count",
        )
        .bind(name)
        .bind(OffsetDateTime::now_utc())
        .bind(article_count as i64)
        .execute(self.0.as_mut())
        .await
        .context("could not record the provider run")?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_provider_last_fetched(
        &mut self,
        name: &str,
    ) -> Result<Option<OffsetDateTime>> {
        sqlx::query_scalar(
            "SELECT last_fetched
            FROM provider_runs
            WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not retrieve the last fetch time")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_provider_runs(&mut self) -> Result<Vec<entities::ProviderRun>> {
        sqlx::query_as(
            "SELECT name, last_fetched, article_count
            FROM provider_runs
            ORDER BY name ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve provider runs")
    }
}
