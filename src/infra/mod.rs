//! Collaborators the pipeline talks to, and the backends behind them.
//!
//! The pipeline only sees the traits below; `main` picks redis + S3 or the
//! in-memory backends, tests always use the in-memory ones.

pub mod documents;
pub mod identity;
pub mod local_db;
pub mod memory;
pub mod storage;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::domain::post::PostData;
use crate::domain::user::CurrentUser;

/// Live subscription: every item is a full snapshot that replaces the last one.
pub type SnapshotStream<T> = BoxStream<'static, Result<T>>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Option<CurrentUser>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key` and returns its retrieval URL.
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String>;

    fn download_url(&self, key: &str) -> String;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the post document keyed by `post.id`.
    async fn upsert_post(&self, post: &PostData) -> Result<()>;

    /// All posts, newest first.
    async fn list_posts(&self) -> Result<Vec<PostData>>;

    /// Snapshots of the post collection ordered by timestamp descending.
    async fn subscribe_posts(&self) -> Result<SnapshotStream<Vec<PostData>>>;

    async fn is_favorite(&self, user_id: &str, post_id: Uuid) -> Result<bool>;

    async fn set_favorite(&self, user_id: &str, post_id: Uuid, favorite: bool) -> Result<()>;

    async fn favorite_ids(&self, user_id: &str) -> Result<HashSet<Uuid>>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
