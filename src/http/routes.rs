use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post))
        .route("/posts/:id/images", get(handlers::list_post_images))
        .route("/posts/:id/prune", post(handlers::prune_post_images))
        .route("/posts/:id/favorite", post(handlers::toggle_favorite))
        .route("/favorites", get(handlers::list_favorites))
}

pub fn drafts() -> Router<AppState> {
    Router::new()
        .route("/drafts", get(handlers::list_drafts))
        .route("/drafts/:id/publish", post(handlers::publish_draft))
        .route("/drafts/:id", delete(handlers::discard_draft))
}

pub fn feed() -> Router<AppState> {
    Router::new()
        .route("/feed", get(handlers::get_feed))
        .route("/feed/stream", get(handlers::feed_stream))
}

pub fn uploads() -> Router<AppState> {
    Router::new()
        .route("/upload/progress", get(handlers::upload_progress))
        .route("/upload/progress/:id", get(handlers::post_upload_progress))
}
