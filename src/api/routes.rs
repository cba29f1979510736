use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, decompression::RequestDecompressionLayer, trace::TraceLayer,
};

use crate::identity::{identify_user, IdentityCodec};
use crate::storage::Storage;

use super::handlers::{
    delete_user_urls, list_user_urls, ping, redirect_url, shorten, shorten_batch, store_url,
    AppState,
};

pub fn create_router(
    storage: Arc<dyn Storage>,
    codec: Arc<IdentityCodec>,
    base_url: impl Into<String>,
) -> Router {
    let state = Arc::new(AppState {
        storage,
        base_url: base_url.into(),
    });

    Router::new()
        .route("/", post(store_url))
        .route("/ping", get(ping))
        .route("/{id}", get(redirect_url))
        .route("/api/shorten", post(shorten))
        .route("/api/shorten/batch", post(shorten_batch))
        .route("/api/user/urls", get(list_user_urls).delete(delete_user_urls))
        .layer(middleware::from_fn_with_state(codec, identify_user))
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
