use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::drafts::DraftAssembler;
use crate::domain::feed::FeedState;
use crate::domain::post::PostData;
use crate::infra::local_db::LocalDb;
use crate::infra::{DocumentStore, IdentityProvider};

/// Keeps the displayed feed in sync with the remote post collection and the
/// drafts stored on this device.
pub struct FeedProjector {
    local: LocalDb,
    drafts: DraftAssembler,
    documents: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    state: watch::Sender<FeedState>,
    // Latest remote snapshot; `None` until the first one arrives.
    remote: Mutex<Option<Vec<PostData>>>,
}

impl FeedProjector {
    pub fn new(
        local: LocalDb,
        documents: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (state, _) = watch::channel(FeedState {
            is_loading: true,
            ..FeedState::default()
        });
        Self {
            drafts: DraftAssembler::new(local.clone()),
            local,
            documents,
            identity,
            state,
            remote: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> FeedState {
        self.state.borrow().clone()
    }

    /// Follows the remote collection and local writes until the remote
    /// subscription ends.
    pub async fn run(&self) -> Result<()> {
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });

        let mut remote = match self.documents.subscribe_posts().await {
            Ok(remote) => remote,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        let mut local_changes = self.local.changes();

        loop {
            tokio::select! {
                next = remote.next() => match next {
                    Some(Ok(posts)) => {
                        info!(posts = posts.len(), "post snapshot received");
                        *self.remote.lock().await = Some(posts);
                        self.refresh().await;
                    }
                    Some(Err(err)) => {
                        warn!(error = ?err, "post subscription error");
                        self.fail(&err);
                    }
                    None => {
                        info!("post subscription ended");
                        return Ok(());
                    }
                },
                changed = local_changes.recv() => match changed {
                    Ok(_) | Err(RecvError::Lagged(_)) => self.refresh().await,
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// One-shot fetch of the remote collection, for callers not running `run`.
    pub async fn load(&self) -> Result<()> {
        match self.documents.list_posts().await {
            Ok(posts) => {
                *self.remote.lock().await = Some(posts);
                self.refresh().await;
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Re-projects the last remote snapshot against current local state.
    ///
    /// The snapshot stays locked until the new state is sent, so a concurrent
    /// `prepend` is never overwritten by a projection that predates it.
    pub async fn refresh(&self) {
        let remote = self.remote.lock().await;
        let loaded = remote.is_some();
        let snapshot = remote.clone().unwrap_or_default();

        match self.project(snapshot).await {
            Ok(posts) => self.state.send_modify(|state| {
                state.posts = posts;
                state.is_loading = !loaded;
                state.error = None;
            }),
            Err(err) => {
                warn!(error = ?err, "failed to project feed");
                self.fail(&err);
            }
        }
    }

    /// Shows a just-published post at the head of the feed before the remote
    /// subscription delivers it.
    pub async fn prepend(&self, post: PostData) {
        let mut remote = self.remote.lock().await;
        let posts = remote.get_or_insert_with(Vec::new);
        posts.retain(|existing| existing.id != post.id);
        posts.insert(0, post.clone());

        self.state.send_modify(|state| {
            state.posts.retain(|existing| existing.id != post.id);
            state.posts.insert(0, post);
        });
    }

    /// Drafts first, then remote posts with local image and favorite overlays.
    pub async fn project(&self, remote: Vec<PostData>) -> Result<Vec<PostData>> {
        let favorites = match self.identity.current_user().await {
            Some(user) => self
                .documents
                .favorite_ids(&user.id)
                .await
                .unwrap_or_else(|err| {
                    warn!(error = ?err, "failed to load favorites");
                    HashSet::new()
                }),
            None => HashSet::new(),
        };

        let drafts = self.drafts.assemble().await?;

        let mut local_uris = HashMap::new();
        for post in remote.iter().filter(|post| post.image_urls.is_empty()) {
            let images = self.local.images_by_post_id(post.id).await?;
            if !images.is_empty() {
                local_uris.insert(post.id, images.into_iter().map(|image| image.uri).collect());
            }
        }

        Ok(merge_feed(drafts, remote, local_uris, &favorites))
    }

    fn fail(&self, err: &anyhow::Error) {
        let message = err.to_string();
        self.state.send_modify(|state| {
            state.is_loading = false;
            state.error = Some(message);
        });
    }
}

/// Drafts whose id already exists remotely are dropped; remote posts without
/// URLs borrow their locally staged images.
pub fn merge_feed(
    drafts: Vec<PostData>,
    remote: Vec<PostData>,
    mut local_uris: HashMap<Uuid, Vec<String>>,
    favorites: &HashSet<Uuid>,
) -> Vec<PostData> {
    let remote_ids: HashSet<Uuid> = remote.iter().map(|post| post.id).collect();

    let mut posts = Vec::with_capacity(drafts.len() + remote.len());
    posts.extend(
        drafts
            .into_iter()
            .filter(|draft| !remote_ids.contains(&draft.id)),
    );

    for mut post in remote {
        if post.image_urls.is_empty() {
            if let Some(uris) = local_uris.remove(&post.id) {
                post.local_image_uris = uris;
            }
        }
        post.is_draft = false;
        post.is_favorite = favorites.contains(&post.id);
        posts.push(post);
    }

    posts
}
