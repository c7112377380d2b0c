use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::app::feed::FeedProjector;
use crate::infra::{DocumentStore, IdentityProvider};

#[derive(Clone)]
pub struct FavoriteService {
    identity: Arc<dyn IdentityProvider>,
    documents: Arc<dyn DocumentStore>,
    feed: Arc<FeedProjector>,
}

impl FavoriteService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        documents: Arc<dyn DocumentStore>,
        feed: Arc<FeedProjector>,
    ) -> Self {
        Self {
            identity,
            documents,
            feed,
        }
    }

    /// Flips the favorite flag of `post_id` for the signed-in user and returns
    /// the new value, or `None` when nobody is signed in.
    pub async fn toggle(&self, post_id: Uuid) -> Result<Option<bool>> {
        let Some(user) = self.identity.current_user().await else {
            return Ok(None);
        };

        let favorite = !self.documents.is_favorite(&user.id, post_id).await?;
        self.documents
            .set_favorite(&user.id, post_id, favorite)
            .await?;
        tracing::debug!(user_id = %user.id, post_id = %post_id, favorite, "favorite toggled");

        self.feed.refresh().await;
        Ok(Some(favorite))
    }

    pub async fn favorite_ids(&self) -> Result<HashSet<Uuid>> {
        match self.identity.current_user().await {
            Some(user) => self.documents.favorite_ids(&user.id).await,
            None => Ok(HashSet::new()),
        }
    }
}
