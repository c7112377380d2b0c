use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use uuid::Uuid;

use crate::app::publish::{DiscardOutcome, PublishError, PublishReport};
use crate::domain::feed::{FeedState, UploadProgress};
use crate::domain::local_image::LocalImage;
use crate::domain::post::{NewPost, PostData};
use crate::http::AppError;
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

#[derive(Serialize)]
pub struct PublishResponse {
    pub post: PostData,
    pub failed_uploads: Vec<String>,
}

impl From<PublishReport> for PublishResponse {
    fn from(report: PublishReport) -> Self {
        Self {
            post: report.post,
            failed_uploads: report.failed.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Serialize)]
pub struct FavoriteResponse {
    pub post_id: Uuid,
    pub is_favorite: bool,
}

#[derive(Serialize)]
pub struct PruneResponse {
    pub post_id: Uuid,
    pub removed_images: u64,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let local = state.local.ping().await.is_ok();
    let documents = state.documents.ping().await.is_ok();
    let objects = state.objects.ping().await.is_ok();
    let status = if local && documents && objects {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse { status })
}

pub async fn create_post(
    State(state): State<AppState>,
    Json(payload): Json<NewPost>,
) -> Result<Json<PublishResponse>, AppError> {
    payload
        .validate(state.max_images_per_post)
        .map_err(AppError::bad_request)?;

    if payload.is_draft {
        let post = state
            .coordinator
            .save_draft(payload)
            .await
            .map_err(|err| log_publish_error(err, None, "failed to save draft"))?;
        return Ok(Json(PublishResponse {
            post,
            failed_uploads: Vec::new(),
        }));
    }

    let post_id = payload.id;
    let report = state
        .coordinator
        .publish(payload)
        .await
        .map_err(|err| log_publish_error(err, post_id, "failed to publish post"))?;

    Ok(Json(report.into()))
}

pub async fn list_drafts(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<PostData>>, AppError> {
    let items = state.drafts.assemble().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to assemble drafts");
        AppError::internal("failed to load drafts")
    })?;

    Ok(Json(ListResponse { items }))
}

pub async fn publish_draft(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<PublishResponse>, AppError> {
    let report = state
        .coordinator
        .publish_draft(id)
        .await
        .map_err(|err| log_publish_error(err, Some(id), "failed to publish draft"))?;

    Ok(Json(report.into()))
}

pub async fn discard_draft(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<DiscardOutcome>, AppError> {
    let outcome = state
        .coordinator
        .discard_draft(id)
        .await
        .map_err(|err| log_publish_error(err, Some(id), "failed to discard draft"))?;

    if outcome.removed_images == 0 && !outcome.removed_metadata {
        return Err(AppError::not_found("draft not found"));
    }
    Ok(Json(outcome))
}

pub async fn list_post_images(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<LocalImage>>, AppError> {
    let items = state.local.images_by_post_id(id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to load staged images");
        AppError::internal("failed to load images")
    })?;

    Ok(Json(ListResponse { items }))
}

pub async fn prune_post_images(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<PruneResponse>, AppError> {
    let removed_images = state
        .coordinator
        .prune_migrated(id)
        .await
        .map_err(|err| log_publish_error(err, Some(id), "failed to prune images"))?;

    Ok(Json(PruneResponse {
        post_id: id,
        removed_images,
    }))
}

pub async fn toggle_favorite(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<FavoriteResponse>, AppError> {
    let favorite = state.favorites.toggle(id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to toggle favorite");
        AppError::internal("failed to toggle favorite")
    })?;

    match favorite {
        Some(is_favorite) => Ok(Json(FavoriteResponse {
            post_id: id,
            is_favorite,
        })),
        None => Err(AppError::unauthorized("user not authenticated")),
    }
}

pub async fn list_favorites(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Uuid>>, AppError> {
    let ids = state.favorites.favorite_ids().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to load favorites");
        AppError::internal("failed to load favorites")
    })?;

    let mut items: Vec<Uuid> = ids.into_iter().collect();
    items.sort();
    Ok(Json(ListResponse { items }))
}

pub async fn get_feed(State(state): State<AppState>) -> Json<FeedState> {
    if let Err(err) = state.feed.load().await {
        tracing::warn!(error = ?err, "failed to load feed");
    }
    Json(state.feed.current())
}

pub async fn feed_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.feed.subscribe();

    let events = stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first {
            receiver.changed().await.ok()?;
        }
        let snapshot = receiver.borrow_and_update().clone();
        let event = match Event::default().event("feed").json_data(&snapshot) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode feed snapshot");
                Event::default().event("error").data("failed to encode feed")
            }
        };
        Some((Ok(event), (receiver, false)))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub async fn upload_progress(State(state): State<AppState>) -> Json<UploadProgress> {
    Json(state.coordinator.progress())
}

pub async fn post_upload_progress(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<UploadProgress>, AppError> {
    state
        .coordinator
        .progress_of(id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("no upload recorded for post"))
}

fn log_publish_error(err: PublishError, post_id: Option<Uuid>, message: &str) -> AppError {
    match &err {
        PublishError::NotAuthenticated
        | PublishError::AlreadyInFlight(_)
        | PublishError::DraftNotFound(_)
        | PublishError::TooManyImages { .. } => {
            tracing::info!(error = %err, post_id = ?post_id, "{}", message);
        }
        _ => tracing::error!(error = %err, post_id = ?post_id, "{}", message),
    }
    err.into()
}
