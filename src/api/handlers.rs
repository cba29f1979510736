use axum::{
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::identity::UserId;
use crate::models::{
    BatchShortenRequest, BatchShortenResponse, ShortUrl, ShortenRequest, ShortenResponse, UserUrl,
};
use crate::storage::{Storage, StorageError};

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub base_url: String,
}

impl AppState {
    fn short_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), id)
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error(e: StorageError) -> ApiError {
    tracing::error!(error = %e, "storage operation failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

/// Accept only absolute URLs with a scheme and a host.
pub(crate) fn parse_long_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let uri: Uri = raw.parse().ok()?;
    (uri.scheme().is_some() && uri.authority().is_some()).then(|| raw.to_string())
}

/// The record a duplicate create should answer with, if the conflict was on
/// the same long URL.
fn duplicate_of<'a>(e: &'a StorageError, long_url: &str) -> Option<&'a ShortUrl> {
    e.existing().filter(|existing| existing.long_url == long_url)
}

/// Shorten a URL sent as plain text
pub async fn store_url(
    State(state): State<Arc<AppState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    body: String,
) -> Response {
    let Some(long_url) = parse_long_url(&body) else {
        return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    };

    match state
        .storage
        .create(ShortUrl::new(long_url.clone()).with_user(user_id))
        .await
    {
        Ok(url) => (StatusCode::CREATED, state.short_url(&url.id)).into_response(),
        Err(e) => match duplicate_of(&e, &long_url) {
            Some(existing) => (StatusCode::CONFLICT, state.short_url(&existing.id)).into_response(),
            None => internal_error(e).into_response(),
        },
    }
}

/// Redirect to the original URL
pub async fn redirect_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.get_by_id(&id).await {
        Ok(url) if url.is_deleted => (StatusCode::GONE, "This link has been deleted").into_response(),
        Ok(url) => Redirect::temporary(&url.long_url).into_response(),
        Err(StorageError::NotFound) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// Shorten a URL sent as JSON
pub async fn shorten(
    State(state): State<Arc<AppState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(payload): Json<ShortenRequest>,
) -> Result<(StatusCode, Json<ShortenResponse>), ApiError> {
    let long_url = parse_long_url(&payload.url)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "URL must be absolute"))?;

    match state
        .storage
        .create(ShortUrl::new(long_url.clone()).with_user(user_id))
        .await
    {
        Ok(url) => Ok((
            StatusCode::CREATED,
            Json(ShortenResponse {
                result: state.short_url(&url.id),
            }),
        )),
        Err(e) => match duplicate_of(&e, &long_url) {
            Some(existing) => Ok((
                StatusCode::CONFLICT,
                Json(ShortenResponse {
                    result: state.short_url(&existing.id),
                }),
            )),
            None => Err(internal_error(e)),
        },
    }
}

/// Shorten several URLs at once, answering in request order
pub async fn shorten_batch(
    State(state): State<Arc<AppState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(payload): Json<Vec<BatchShortenRequest>>,
) -> Result<(StatusCode, Json<Vec<BatchShortenResponse>>), ApiError> {
    if payload.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Batch cannot be empty"));
    }

    let mut urls = Vec::with_capacity(payload.len());
    for item in payload {
        let long_url = parse_long_url(&item.original_url).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Invalid URL for correlation id {}", item.correlation_id),
            )
        })?;
        urls.push(ShortUrl {
            correlation_id: item.correlation_id,
            ..ShortUrl::new(long_url).with_user(user_id.clone())
        });
    }

    let created = state.storage.create_batch(urls).await.map_err(internal_error)?;

    let response = created
        .into_iter()
        .map(|url| BatchShortenResponse {
            short_url: state.short_url(&url.id),
            correlation_id: url.correlation_id,
        })
        .collect();

    Ok((StatusCode::CREATED, Json(response)))
}

/// List the URLs shortened by the current user
pub async fn list_user_urls(
    State(state): State<Arc<AppState>>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> Result<Response, ApiError> {
    let urls = state
        .storage
        .find_by_user_id(&user_id)
        .await
        .map_err(internal_error)?;

    if urls.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let urls: Vec<UserUrl> = urls
        .into_iter()
        .map(|url| UserUrl {
            short_url: state.short_url(&url.id),
            original_url: url.long_url,
        })
        .collect();

    Ok(Json(urls).into_response())
}

/// Schedule deletion of the current user's URLs; answers before the rows change
pub async fn delete_user_urls(
    State(state): State<Arc<AppState>>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(ids): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .delete_batch(&user_id, ids)
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::ACCEPTED)
}

/// Storage connectivity check
pub async fn ping(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    state.storage.ping().await.map_err(internal_error)?;
    Ok("OK")
}
