//! In-memory remote backends for offline runs and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::post::PostData;
use crate::infra::{DocumentStore, ObjectStore, SnapshotStream};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    failing_sizes: Mutex<HashSet<usize>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every later upload whose payload has exactly `len` bytes.
    pub fn fail_uploads_of_len(&self, len: usize) {
        lock(&self.failing_sizes).insert(len);
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        if lock(&self.failing_sizes).contains(&data.len()) {
            return Err(anyhow!("simulated upload failure for {}", key));
        }
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(self.download_url(key))
    }

    fn download_url(&self, key: &str) -> String {
        format!("memory://objects/{}", key)
    }
}

/// Post collection with live snapshots driven by a watch channel.
pub struct MemoryDocumentStore {
    posts: watch::Sender<Vec<PostData>>,
    favorites: Mutex<HashMap<String, HashSet<Uuid>>>,
    fail_writes: Mutex<bool>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        let (posts, _) = watch::channel(Vec::new());
        Self {
            posts,
            favorites: Mutex::new(HashMap::new()),
            fail_writes: Mutex::new(false),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    pub fn post(&self, id: Uuid) -> Option<PostData> {
        self.posts.borrow().iter().find(|post| post.id == id).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert_post(&self, post: &PostData) -> Result<()> {
        if *lock(&self.fail_writes) {
            return Err(anyhow!("simulated document write failure"));
        }

        let post = post.clone();
        self.posts.send_modify(|posts| {
            posts.retain(|existing| existing.id != post.id);
            posts.push(post);
            posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        });
        Ok(())
    }

    async fn list_posts(&self) -> Result<Vec<PostData>> {
        Ok(self.posts.borrow().clone())
    }

    async fn subscribe_posts(&self) -> Result<SnapshotStream<Vec<PostData>>> {
        let mut receiver = self.posts.subscribe();
        receiver.mark_changed();

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let snapshot = receiver.borrow_and_update().clone();
            Some((Ok(snapshot), receiver))
        })
        .boxed())
    }

    async fn is_favorite(&self, user_id: &str, post_id: Uuid) -> Result<bool> {
        Ok(lock(&self.favorites)
            .get(user_id)
            .map_or(false, |ids| ids.contains(&post_id)))
    }

    async fn set_favorite(&self, user_id: &str, post_id: Uuid, favorite: bool) -> Result<()> {
        let mut favorites = lock(&self.favorites);
        let ids = favorites.entry(user_id.to_string()).or_default();
        if favorite {
            ids.insert(post_id);
        } else {
            ids.remove(&post_id);
        }
        Ok(())
    }

    async fn favorite_ids(&self, user_id: &str) -> Result<HashSet<Uuid>> {
        Ok(lock(&self.favorites)
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
