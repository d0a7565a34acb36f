use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize, Debug, Clone)]
pub struct Message<T = ()> {
    pub message: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub articles: Option<T>,
}

impl Message {
    pub fn new(message: &'static str) -> Self {
        Self {
            message,
            articles: None,
        }
    }
}

impl<T: Serialize> Message<T> {
    pub fn with_articles(message: &'static str, articles: T) -> Self {
        Self {
            message,
            articles: Some(articles),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArticleNotFound;

impl IntoResponse for ArticleNotFound {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, Json(Message::new("Article not found"))).into_response()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UrlTaken;

impl IntoResponse for UrlTaken {
    fn into_response(self) -> Response {
        (
            StatusCode::CONFLICT,
            Json(Message::new("An article with this url already exists")),
        )
            .into_response()
    }
}

/// The request body could not be read at all.
#[derive(Debug, Clone)]
pub struct InvalidPayload {
    pub message: String,
}

impl IntoResponse for InvalidPayload {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            message: String,
        }

        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(Body {
                message: self.message,
            }),
        )
            .into_response()
    }
}

/// A single field failed validation.
#[derive(Debug, Clone)]
pub struct InvalidField {
    pub field: &'static str,
    pub message: String,
}

impl InvalidField {
    pub fn required(field: &'static str) -> Self {
        Self {
            field,
            message: format!("The {field} field is required."),
        }
    }

    pub fn not_a_date(field: &'static str) -> Self {
        Self {
            field,
            message: format!("The {field} field must be a valid date."),
        }
    }
}

impl IntoResponse for InvalidField {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            errors: BTreeMap<&'static str, Vec<String>>,
        }

        let errors = BTreeMap::from([(self.field, vec![self.message])]);

        (StatusCode::UNPROCESSABLE_ENTITY, Json(Body { errors })).into_response()
    }
}
