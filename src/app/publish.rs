use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::drafts::DraftAssembler;
use crate::app::feed::FeedProjector;
use crate::app::staging::ImageStager;
use crate::domain::feed::UploadProgress;
use crate::domain::local_image::LocalImage;
use crate::domain::now_millis;
use crate::domain::post::{NewPost, PostData};
use crate::domain::user::CurrentUser;
use crate::infra::local_db::LocalDb;
use crate::infra::{DocumentStore, IdentityProvider, ObjectStore};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("user not authenticated")]
    NotAuthenticated,
    #[error("local storage failed: {0}")]
    LocalStorageFailed(String),
    #[error("image {image_id} ({uri}) failed to upload: {reason}")]
    ImageUploadFailed {
        image_id: Uuid,
        uri: String,
        reason: String,
    },
    #[error("failed to write post document: {0}")]
    DocumentWriteFailed(String),
    #[error("post {0} is already being published")]
    AlreadyInFlight(Uuid),
    #[error("draft {0} not found")]
    DraftNotFound(Uuid),
    #[error("post {post_id} would have {total} images, at most {limit} are allowed")]
    TooManyImages {
        post_id: Uuid,
        total: usize,
        limit: usize,
    },
}

impl PublishError {
    fn local(err: anyhow::Error) -> Self {
        Self::LocalStorageFailed(err.to_string())
    }
}

/// Outcome of a successful publish. `failed` only ever holds
/// `ImageUploadFailed` entries, one per image left out of `post.image_urls`.
#[derive(Debug)]
pub struct PublishReport {
    pub post: PostData,
    pub failed: Vec<PublishError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscardOutcome {
    pub post_id: Uuid,
    pub removed_images: u64,
    pub removed_metadata: bool,
}

/// Moves posts from staged local state to the remote stores.
pub struct UploadCoordinator {
    local: LocalDb,
    stager: ImageStager,
    drafts: DraftAssembler,
    identity: Arc<dyn IdentityProvider>,
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    feed: Arc<FeedProjector>,
    upload_concurrency: usize,
    max_images_per_post: usize,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    // Latest report of any post; `per_post` keeps each post's own fraction.
    progress: watch::Sender<UploadProgress>,
    per_post: Mutex<HashMap<Uuid, f32>>,
}

struct InFlightGuard {
    post_id: Uuid,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(&self.post_id);
    }
}

impl UploadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: LocalDb,
        stager: ImageStager,
        identity: Arc<dyn IdentityProvider>,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        feed: Arc<FeedProjector>,
        upload_concurrency: usize,
        max_images_per_post: usize,
    ) -> Self {
        let (progress, _) = watch::channel(UploadProgress::default());
        Self {
            drafts: DraftAssembler::new(local.clone()),
            local,
            stager,
            identity,
            objects,
            documents,
            feed,
            upload_concurrency: upload_concurrency.max(1),
            max_images_per_post,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            progress,
            per_post: Mutex::new(HashMap::new()),
        }
    }

    /// Every progress report as it happens. Reports of concurrent publishes
    /// interleave; filter on `post_id` for a single post's climb.
    pub fn subscribe_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    /// The most recent report of any post.
    pub fn progress(&self) -> UploadProgress {
        *self.progress.borrow()
    }

    /// Progress of the latest publish attempt of `post_id`.
    pub fn progress_of(&self, post_id: Uuid) -> Option<UploadProgress> {
        self.per_post
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(&post_id)
            .map(|fraction| UploadProgress {
                post_id: Some(post_id),
                fraction: *fraction,
            })
    }

    fn begin(&self, post_id: Uuid) -> Result<InFlightGuard, PublishError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|err| err.into_inner());
        if !in_flight.insert(post_id) {
            return Err(PublishError::AlreadyInFlight(post_id));
        }
        Ok(InFlightGuard {
            post_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Stages the images and metadata of `new_post` without touching the
    /// network. Signed-out users may keep drafts.
    pub async fn save_draft(&self, new_post: NewPost) -> Result<PostData, PublishError> {
        let post_id = new_post.id.unwrap_or_else(Uuid::new_v4);
        let _guard = self.begin(post_id)?;

        let user = self.identity.current_user().await;
        let (user_id, user_name) = match &user {
            Some(user) => (user.id.clone(), user.author_name()),
            None => (String::new(), String::new()),
        };

        let sources = new_post.images.clone();
        let mut draft = new_post.into_pending(post_id, user_id, user_name);
        draft.is_draft = true;

        let images = self.stage(&draft, &sources).await?;
        draft.local_image_uris = images.into_iter().map(|image| image.uri).collect();

        info!(post_id = %post_id, images = draft.local_image_uris.len(), "draft saved");
        Ok(draft)
    }

    /// Stages, uploads and commits `new_post` as a remote document.
    pub async fn publish(&self, new_post: NewPost) -> Result<PublishReport, PublishError> {
        let user = self.require_user().await?;
        let post_id = new_post.id.unwrap_or_else(Uuid::new_v4);
        let _guard = self.begin(post_id)?;

        let sources = new_post.images.clone();
        let mut pending = new_post.into_pending(post_id, user.id.clone(), user.author_name());
        pending.is_draft = false;

        self.stage(&pending, &sources).await?;
        self.upload_and_finalize(pending).await
    }

    /// Publishes a draft stored on this device. Images that already went up
    /// keep their recorded URL.
    pub async fn publish_draft(&self, post_id: Uuid) -> Result<PublishReport, PublishError> {
        let user = self.require_user().await?;
        let _guard = self.begin(post_id)?;

        let mut pending = self
            .drafts
            .draft(post_id)
            .await
            .map_err(PublishError::local)?
            .ok_or(PublishError::DraftNotFound(post_id))?;

        pending.user_id = user.id.clone();
        pending.user_name = user.author_name();
        pending.is_draft = false;
        pending.local_image_uris.clear();

        self.upload_and_finalize(pending).await
    }

    /// Publishes every draft the assembler can see, one after another.
    pub async fn publish_all_drafts(
        &self,
    ) -> Result<Vec<(Uuid, Result<PublishReport, PublishError>)>, PublishError> {
        let drafts = self.drafts.assemble().await.map_err(PublishError::local)?;
        let mut outcomes = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let outcome = self.publish_draft(draft.id).await;
            outcomes.push((draft.id, outcome));
        }
        Ok(outcomes)
    }

    /// Drops every local trace of a post: rows, metadata and staged files.
    pub async fn discard_draft(&self, post_id: Uuid) -> Result<DiscardOutcome, PublishError> {
        let _guard = self.begin(post_id)?;

        let images = self
            .local
            .images_by_post_id(post_id)
            .await
            .map_err(PublishError::local)?;
        let removed_images = self
            .local
            .delete_by_post_id(post_id)
            .await
            .map_err(PublishError::local)?;
        let removed_metadata = self
            .local
            .delete_draft(post_id)
            .await
            .map_err(PublishError::local)?;
        self.stager
            .remove_files(images.iter().map(|image| image.uri.as_str()).collect::<Vec<_>>())
            .await;

        info!(post_id = %post_id, removed_images, "draft discarded");
        Ok(DiscardOutcome {
            post_id,
            removed_images,
            removed_metadata,
        })
    }

    /// Deletes local rows of a post whose document is the source of truth:
    /// nothing left to upload and no stored draft metadata.
    pub async fn prune_migrated(&self, post_id: Uuid) -> Result<u64, PublishError> {
        let _guard = self.begin(post_id)?;

        let pending = self
            .local
            .unuploaded_images_by_post_id(post_id)
            .await
            .map_err(PublishError::local)?;
        let stored = self.local.draft(post_id).await.map_err(PublishError::local)?;
        if !pending.is_empty() || stored.is_some() {
            return Ok(0);
        }

        let images = self
            .local
            .images_by_post_id(post_id)
            .await
            .map_err(PublishError::local)?;
        let removed = self
            .local
            .delete_by_post_id(post_id)
            .await
            .map_err(PublishError::local)?;
        self.stager
            .remove_files(images.iter().map(|image| image.uri.as_str()).collect::<Vec<_>>())
            .await;
        Ok(removed)
    }

    async fn require_user(&self) -> Result<CurrentUser, PublishError> {
        self.identity
            .current_user()
            .await
            .ok_or(PublishError::NotAuthenticated)
    }

    /// Copies `sources` after any images already staged for the post, writes
    /// their rows and stores the post metadata.
    async fn stage(
        &self,
        post: &PostData,
        sources: &[String],
    ) -> Result<Vec<LocalImage>, PublishError> {
        let existing = self
            .local
            .images_by_post_id(post.id)
            .await
            .map_err(PublishError::local)?;
        self.check_image_count(post.id, existing.len() + sources.len())?;

        let not_before = existing
            .iter()
            .map(|image| image.timestamp + 1)
            .max()
            .unwrap_or(0);
        let images = self
            .stager
            .stage(post.id, existing.len(), not_before, sources)
            .await
            .map_err(PublishError::local)?;
        self.local
            .insert_all(&images)
            .await
            .map_err(PublishError::local)?;
        self.local
            .save_draft(post)
            .await
            .map_err(PublishError::local)?;

        info!(post_id = %post.id, staged = images.len(), "images staged");
        Ok(images)
    }

    fn check_image_count(&self, post_id: Uuid, total: usize) -> Result<(), PublishError> {
        if total > self.max_images_per_post {
            return Err(PublishError::TooManyImages {
                post_id,
                total,
                limit: self.max_images_per_post,
            });
        }
        Ok(())
    }

    async fn upload_and_finalize(&self, mut post: PostData) -> Result<PublishReport, PublishError> {
        let post_id = post.id;
        let images = self
            .local
            .images_by_post_id(post_id)
            .await
            .map_err(PublishError::local)?;
        self.check_image_count(post_id, images.len())?;

        let total = images.len();
        self.report_progress(post_id, 0, total);

        let mut urls: Vec<Option<String>> = vec![None; total];
        let mut uploads = Vec::new();
        for (index, image) in images.into_iter().enumerate() {
            match (image.is_uploaded, image.remote_url.clone()) {
                (true, Some(url)) => urls[index] = Some(url),
                (true, None) => {
                    warn!(post_id = %post_id, image_id = %image.id, "uploaded image has no recorded URL");
                }
                (false, _) => uploads.push((index, image)),
            }
        }

        let mut completed = total - uploads.len();
        self.report_progress(post_id, completed, total);

        let mut failed = Vec::new();
        let mut results = stream::iter(uploads)
            .map(move |(index, image)| async move { (index, self.upload_one(post_id, image).await) })
            .buffer_unordered(self.upload_concurrency);

        while let Some((index, result)) = results.next().await {
            completed += 1;
            self.report_progress(post_id, completed, total);
            match result {
                Ok(url) => urls[index] = Some(url),
                Err(err @ PublishError::ImageUploadFailed { .. }) => {
                    warn!(post_id = %post_id, error = %err, "image upload skipped");
                    failed.push(err);
                }
                Err(err) => {
                    error!(post_id = %post_id, error = %err, "publish aborted");
                    return Err(err);
                }
            }
        }
        drop(results);

        post.image_urls = urls.into_iter().flatten().collect();
        post.local_image_uris.clear();
        post.is_draft = false;
        post.is_local_only = false;
        post.needs_upload = false;
        post.is_favorite = false;
        post.timestamp = now_millis();

        if let Err(err) = self.documents.upsert_post(&post).await {
            error!(post_id = %post_id, error = ?err, "failed to write post document");
            return Err(PublishError::DocumentWriteFailed(err.to_string()));
        }
        info!(
            post_id = %post_id,
            images = post.image_urls.len(),
            failed = failed.len(),
            "post published"
        );

        self.forget_local_state(post_id, &failed).await;
        self.feed.prepend(post.clone()).await;
        self.report_progress(post_id, total, total);

        Ok(PublishReport { post, failed })
    }

    /// After the document is committed the draft metadata is obsolete, and so
    /// are rows and files of images that never made it into the post.
    async fn forget_local_state(&self, post_id: Uuid, failed: &[PublishError]) {
        if let Err(err) = self.local.delete_draft(post_id).await {
            warn!(post_id = %post_id, error = ?err, "failed to clear draft metadata");
        }

        let mut orphaned = Vec::new();
        for failure in failed {
            if let PublishError::ImageUploadFailed { image_id, uri, .. } = failure {
                match self.local.delete_by_id(*image_id).await {
                    Ok(_) => orphaned.push(uri.as_str()),
                    Err(err) => {
                        warn!(image_id = %image_id, error = ?err, "failed to drop unuploaded image row")
                    }
                }
            }
        }
        self.stager.remove_files(orphaned).await;
    }

    async fn upload_one(&self, post_id: Uuid, image: LocalImage) -> Result<String, PublishError> {
        let upload_failed = |reason: String| PublishError::ImageUploadFailed {
            image_id: image.id,
            uri: image.uri.clone(),
            reason,
        };

        let data = tokio::fs::read(&image.uri)
            .await
            .map_err(|err| upload_failed(err.to_string()))?;
        let (content_type, extension) = sniff_content_type(&data);
        let key = format!("posts/{}/{}.{}", post_id, Uuid::new_v4(), extension);

        let url = self
            .objects
            .put_object(&key, Bytes::from(data), content_type)
            .await
            .map_err(|err| upload_failed(err.to_string()))?;

        self.local
            .mark_as_uploaded(image.id, Some(&url))
            .await
            .map_err(PublishError::local)?;

        info!(post_id = %post_id, image_id = %image.id, key = %key, "image uploaded");
        Ok(url)
    }

    fn report_progress(&self, post_id: Uuid, completed: usize, total: usize) {
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f32 / total as f32
        };
        self.per_post
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(post_id, fraction);
        self.progress.send_replace(UploadProgress {
            post_id: Some(post_id),
            fraction,
        });
    }
}

/// Content type and key extension for an image payload.
pub fn sniff_content_type(data: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Jpeg) => ("image/jpeg", "jpg"),
        Ok(image::ImageFormat::Png) => ("image/png", "png"),
        Ok(image::ImageFormat::WebP) => ("image/webp", "webp"),
        _ => ("application/octet-stream", "bin"),
    }
}
