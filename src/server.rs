mod responses;
mod routes;

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, TraceLayer};
use tracing::{error, info, Level};

use crate::state::State;

async fn convert_errors<F, R>(fut: F) -> axum::response::Result<R>
where
    F: Future<Output = Result<R>>,
{
    match fut.await {
        Ok(r) => Ok(r),

        Err(e) => {
            error!("Error occured while processing an HTTP request: {e:#}");

            Err(StatusCode::INTERNAL_SERVER_ERROR.into())
        }
    }
}

pub struct Server {
    socket: TcpListener,
    app: Router,
}

impl Server {
    pub async fn new(state: State) -> Result<Self> {
        let bind_addr = &state.cfg.bind_addr;
        let socket = TcpListener::bind(bind_addr)
            .await
            .with_context(|| anyhow!("could not bind to `{bind_addr}`"))?;
        info!("Listening on {bind_addr}");

        Ok(Self {
            socket,
            app: Self::router(state),
        })
    }

    pub fn router(state: State) -> Router {
        use axum::routing::get;

        Router::new()
            .route(
                "/api/articles",
                get(routes::list_articles).post(routes::create_article),
            )
            .route(
                "/api/articles/:id",
                get(routes::get_article)
                    .put(routes::update_article)
                    .delete(routes::delete_article),
            )
            .route("/api/scheduler", get(routes::dispatch).post(routes::dispatch))
            .route("/api/providers", get(routes::list_providers))
            .layer(
                ServiceBuilder::new().layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO)),
                ),
            )
            .with_state(state)
    }

    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        axum::serve(self.socket, self.app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .context("the HTTP server encountered a failure")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use mockito::Matcher;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{self, Config, ProviderConfig, Providers};
    use crate::fetch::Fetcher;
    use crate::storage::Storage;

    async fn state(cfg: Config) -> State {
        State::with_storage(cfg, Storage::in_memory().await.unwrap()).unwrap()
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, body)
    }

    fn article(url: &str) -> Value {
        json!({
            "title": "Rust 2024 edition released",
            "author": "Alex Doe",
            "source": "Wired",
            "category": "technology",
            "description": "The edition is out",
            "url": url,
            "published_at": "2025-02-14T13:00:05-05:00"
        })
    }

    #[tokio::test]
    async fn article_lifecycle() {
        let app = Server::router(state(Config::default()).await);

        let (status, body) =
            call(&app, Method::POST, "/api/articles", Some(article("https://a.example/1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "message": "Article saved successfully!" }));

        let (status, _) =
            call(&app, Method::POST, "/api/articles", Some(article("https://a.example/1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, Method::GET, "/api/articles", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Articles listed successfully!");
        let id = body["articles"][0]["id"].as_i64().unwrap();
        assert_eq!(body["articles"][0]["published_at"], "2025-02-14 18:00:05");

        let (status, body) = call(&app, Method::GET, &format!("/api/articles/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Article retrieved successfully!");
        assert_eq!(body["articles"]["author"], "Alex Doe");

        let mut revised = article("https://a.example/1");
        revised["title"] = json!("Revised");
        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/articles/{id}"),
            Some(revised),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Article updated successfully!");
        assert_eq!(body["articles"]["title"], "Revised");

        let (status, body) =
            call(&app, Method::DELETE, &format!("/api/articles/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Article deleted successfully!" }));

        let (status, body) = call(&app, Method::GET, &format!("/api/articles/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "message": "Article not found" }));

        let (status, _) = call(&app, Method::DELETE, &format!("/api/articles/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_invalid_articles() {
        let app = Server::router(state(Config::default()).await);

        let mut bad_date = article("https://a.example/1");
        bad_date["published_at"] = json!("not a date");
        let (status, body) = call(&app, Method::POST, "/api/articles", Some(bad_date)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body,
            json!({ "errors": { "published_at": ["The published_at field must be a valid date."] } }),
        );

        let (status, _) = call(&app, Method::POST, "/api/articles", Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/articles",
            Some(json!({ "url": "https://a.example/x" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body,
            json!({ "errors": { "title": ["The title field is required."] } }),
        );

        for field in ["author", "source", "description", "published_at"] {
            let mut missing = article("https://a.example/x");
            missing.as_object_mut().unwrap().remove(field);

            let (status, body) = call(&app, Method::POST, "/api/articles", Some(missing)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert!(body["errors"][field].is_array(), "{field}: {body}");
        }

        let mut far_future = article("https://a.example/x");
        far_future["published_at"] = json!("9999-12-31T23:59:59-05:00");
        let (status, _) = call(&app, Method::POST, "/api/articles", Some(far_future)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, body) = call(&app, Method::GET, "/api/articles", None).await;
        assert_eq!(body["articles"], json!([]));

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/articles/42",
            Some(article("https://a.example/1")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn updates_cannot_steal_urls() {
        let app = Server::router(state(Config::default()).await);

        for url in ["https://a.example/1", "https://a.example/2"] {
            call(&app, Method::POST, "/api/articles", Some(article(url))).await;
        }

        let (_, body) = call(&app, Method::GET, "/api/articles?search=edition", None).await;
        let id = body["articles"][0]["id"].as_i64().unwrap();
        let other = body["articles"][1]["url"].as_str().unwrap().to_owned();

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/articles/{id}"),
            Some(article(&other)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn lists_with_preference_filters() {
        let app = Server::router(state(Config::default()).await);

        let mut business = article("https://a.example/business");
        business["category"] = json!("business");
        business["author"] = json!("Someone Else");
        let mut guardian = article("https://a.example/guardian");
        guardian["category"] = json!("world");
        guardian["source"] = json!("The Guardian");
        guardian["author"] = json!("Someone Else");
        let other = article("https://a.example/other");

        for body in [business, guardian, other] {
            call(&app, Method::POST, "/api/articles", Some(body)).await;
        }

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/articles?category=business&source=The%20Guardian",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut urls = body["articles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["url"].as_str().unwrap().to_owned())
            .collect::<Vec<_>>();
        urls.sort();
        assert_eq!(
            urls,
            vec!["https://a.example/business", "https://a.example/guardian"],
        );

        let (_, body) = call(&app, Method::GET, "/api/articles?date=2025-02-14&limit=1", None).await;
        assert_eq!(body["articles"].as_array().unwrap().len(), 1);

        let (status, body) = call(&app, Method::GET, "/api/articles?date=yesterday", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["date"].is_array());
    }

    #[tokio::test]
    async fn dispatch_wakes_the_scheduler() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/svc/topstories/v2/home.json")
            .match_query(Matcher::UrlEncoded("api-key".into(), "key".into()))
            .with_status(200)
            .with_body(
                json!({
                    "results": [{
                        "url": "https://www.nytimes.com/dispatched",
                        "title": "Dispatched",
                        "published_date": "2025-02-14T05:00:08-05:00"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let state = state(Config {
            providers: Providers {
                nyt: Some(ProviderConfig {
                    request_url: Some(
                        format!("{}/svc/topstories/v2/home.json", server.url())
                            .parse()
                            .unwrap(),
                    ),
                    api_key: "key".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            max_retries: 0,
            retry_backoff: config::Duration::from_millis(1),
            ..Default::default()
        })
        .await;

        // a recent run pushes the scheduled fetch a day out.
        let mut tx = state.storage.begin().await.unwrap();
        tx.record_provider_run("nyt", 0).await.unwrap();
        tx.commit().await.unwrap();

        let cancel = CancellationToken::new();
        let fetcher = Fetcher::new(
            state.providers.clone(),
            state.client.clone(),
            state.storage.clone(),
            Duration::from_secs(86400),
            Duration::ZERO,
        );
        tokio::spawn(fetcher.run(cancel.clone()));

        let app = Server::router(state.clone());
        let (status, body) = call(&app, Method::POST, "/api/scheduler", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Job has been dispatched!" }));

        let stored = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let mut tx = state.storage.begin().await.unwrap();
                let count = tx.count_articles().await.unwrap();
                tx.commit().await.unwrap();

                if count > 0 {
                    break count;
                }

                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(stored, 1);

        let (_, body) = call(&app, Method::GET, "/api/providers", None).await;
        assert_eq!(body["providers"][0]["name"], "nyt");
        assert_eq!(body["providers"][0]["enabled"], true);

        cancel.cancel();
    }

    #[tokio::test]
    async fn providers_report_never_fetched() {
        let state = state(Config {
            providers: Providers {
                guardian: Some(ProviderConfig::default()),
                ..Default::default()
            },
            ..Default::default()
        })
        .await;
        let app = Server::router(state);

        let (status, body) = call(&app, Method::GET, "/api/providers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "providers": [{
                    "name": "guardian",
                    "enabled": false,
                    "last_fetched": null,
                    "article_count": 0
                }]
            }),
        );
    }
}
