use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use redis::{AsyncCommands, Client};
use tracing::warn;
use uuid::Uuid;

use crate::domain::post::PostData;
use crate::infra::{DocumentStore, SnapshotStream};

const POSTS_KEY: &str = "posts";
const POSTS_BY_TIME_KEY: &str = "posts:by_timestamp";
const POSTS_CHANNEL: &str = "posts:changed";

/// Post collection kept in redis: one hash of JSON documents, a sorted set
/// ordering them by timestamp, and a pub/sub channel announcing writes.
#[derive(Clone)]
pub struct RedisDocumentStore {
    client: Client,
}

impl RedisDocumentStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client })
    }
}

fn favorites_key(user_id: &str) -> String {
    format!("users:{}:favorites", user_id)
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn upsert_post(&self, post: &PostData) -> Result<()> {
        let payload = serde_json::to_string(post)?;
        let id = post.id.to_string();
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::pipe()
            .atomic()
            .hset(POSTS_KEY, &id, payload)
            .ignore()
            .zadd(POSTS_BY_TIME_KEY, &id, post.timestamp)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        if let Err(err) = conn.publish::<_, _, ()>(POSTS_CHANNEL, &id).await {
            warn!(error = ?err, post_id = %post.id, "failed to announce post write");
        }
        Ok(())
    }

    async fn list_posts(&self) -> Result<Vec<PostData>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.zrevrange(POSTS_BY_TIME_KEY, 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let payloads: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(POSTS_KEY)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let mut posts = Vec::with_capacity(payloads.len());
        for (id, payload) in ids.iter().zip(payloads) {
            let Some(payload) = payload else {
                continue;
            };
            match serde_json::from_str::<PostData>(&payload) {
                Ok(post) => posts.push(post),
                Err(err) => warn!(error = %err, post_id = %id, "skipping unreadable post document"),
            }
        }
        Ok(posts)
    }

    async fn subscribe_posts(&self) -> Result<SnapshotStream<Vec<PostData>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(POSTS_CHANNEL).await?;
        let messages = pubsub.into_on_message();

        let store = self.clone();
        let initial = stream::once(async move { store.list_posts().await });
        let store = self.clone();
        let updates = messages.then(move |_| {
            let store = store.clone();
            async move { store.list_posts().await }
        });

        Ok(initial.chain(updates).boxed())
    }

    async fn is_favorite(&self, user_id: &str, post_id: Uuid) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let member: bool = conn
            .sismember(favorites_key(user_id), post_id.to_string())
            .await?;
        Ok(member)
    }

    async fn set_favorite(&self, user_id: &str, post_id: Uuid, favorite: bool) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = favorites_key(user_id);
        if favorite {
            conn.sadd::<_, _, ()>(key, post_id.to_string()).await?;
        } else {
            conn.srem::<_, _, ()>(key, post_id.to_string()).await?;
        }
        Ok(())
    }

    async fn favorite_ids(&self, user_id: &str) -> Result<HashSet<Uuid>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let members: Vec<String> = conn.smembers(favorites_key(user_id)).await?;
        Ok(members
            .iter()
            .filter_map(|member| Uuid::parse_str(member).ok())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
