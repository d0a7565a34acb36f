use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(FromRow, Debug, Clone)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Already in the canonical timestamp format.
    pub published_at: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(FromRow, Debug, Clone)]
pub struct ProviderRun {
    pub name: String,
    pub last_fetched: OffsetDateTime,
    pub article_count: i64,
}
