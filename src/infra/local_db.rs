use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::domain::local_image::LocalImage;
use crate::domain::now_millis;
use crate::domain::post::PostData;
use crate::infra::SnapshotStream;

const SCHEMA: &str = include_str!("../../migrations/0001_local_tables.sql");
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// On-device tables: staged images and the metadata of unpublished posts.
///
/// Every write announces the affected post id on a broadcast channel so live
/// queries can re-run.
#[derive(Clone)]
pub struct LocalDb {
    pool: SqlitePool,
    changes: broadcast::Sender<Uuid>,
}

impl LocalDb {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // In-memory databases live only as long as their connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Post ids touched by local writes, as they happen.
    pub fn changes(&self) -> broadcast::Receiver<Uuid> {
        self.changes.subscribe()
    }

    fn notify(&self, post_id: Uuid) {
        // No subscribers is fine.
        let _ = self.changes.send(post_id);
    }

    pub async fn insert(&self, image: &LocalImage) -> Result<()> {
        sqlx::query(
            "INSERT INTO local_images (id, post_id, uri, timestamp, is_uploaded, remote_url) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(image.id.to_string())
        .bind(image.post_id.to_string())
        .bind(&image.uri)
        .bind(image.timestamp)
        .bind(image.is_uploaded)
        .bind(image.remote_url.as_deref())
        .execute(&self.pool)
        .await?;

        self.notify(image.post_id);
        Ok(())
    }

    pub async fn insert_all(&self, images: &[LocalImage]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for image in images {
            sqlx::query(
                "INSERT INTO local_images (id, post_id, uri, timestamp, is_uploaded, remote_url) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(image.id.to_string())
            .bind(image.post_id.to_string())
            .bind(&image.uri)
            .bind(image.timestamp)
            .bind(image.is_uploaded)
            .bind(image.remote_url.as_deref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut post_ids: Vec<Uuid> = images.iter().map(|image| image.post_id).collect();
        post_ids.sort();
        post_ids.dedup();
        for post_id in post_ids {
            self.notify(post_id);
        }
        Ok(())
    }

    pub async fn update(&self, image: &LocalImage) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE local_images \
             SET post_id = ?2, uri = ?3, timestamp = ?4, is_uploaded = ?5, remote_url = ?6 \
             WHERE id = ?1",
        )
        .bind(image.id.to_string())
        .bind(image.post_id.to_string())
        .bind(&image.uri)
        .bind(image.timestamp)
        .bind(image.is_uploaded)
        .bind(image.remote_url.as_deref())
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.notify(image.post_id);
        }
        Ok(updated)
    }

    /// Images of a post in staging order.
    pub async fn images_by_post_id(&self, post_id: Uuid) -> Result<Vec<LocalImage>> {
        let rows = sqlx::query(
            "SELECT id, post_id, uri, timestamp, is_uploaded, remote_url \
             FROM local_images WHERE post_id = ?1 \
             ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(image_from_row).collect()
    }

    pub async fn unuploaded_images_by_post_id(&self, post_id: Uuid) -> Result<Vec<LocalImage>> {
        let rows = sqlx::query(
            "SELECT id, post_id, uri, timestamp, is_uploaded, remote_url \
             FROM local_images WHERE post_id = ?1 AND is_uploaded = 0 \
             ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(image_from_row).collect()
    }

    pub async fn all_unuploaded_images(&self) -> Result<Vec<LocalImage>> {
        let rows = sqlx::query(
            "SELECT id, post_id, uri, timestamp, is_uploaded, remote_url \
             FROM local_images WHERE is_uploaded = 0 \
             ORDER BY timestamp ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(image_from_row).collect()
    }

    pub async fn count_by_post_id(&self, post_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM local_images WHERE post_id = ?1")
            .bind(post_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Flips `is_uploaded` and records where the object ended up.
    ///
    /// Returns false when the row is missing or was already marked; the
    /// stored URL is never overwritten by a repeated call.
    pub async fn mark_as_uploaded(&self, id: Uuid, remote_url: Option<&str>) -> Result<bool> {
        let row = sqlx::query(
            "UPDATE local_images SET is_uploaded = 1, remote_url = ?2 \
             WHERE id = ?1 AND is_uploaded = 0 \
             RETURNING post_id",
        )
        .bind(id.to_string())
        .bind(remote_url)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                self.notify(parse_uuid(&row, "post_id")?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn delete_by_id(&self, id: Uuid) -> Result<bool> {
        let row = sqlx::query("DELETE FROM local_images WHERE id = ?1 RETURNING post_id")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                self.notify(parse_uuid(&row, "post_id")?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn delete_by_post_id(&self, post_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM local_images WHERE post_id = ?1")
            .bind(post_id.to_string())
            .execute(&self.pool)
            .await?;

        self.notify(post_id);
        Ok(result.rows_affected())
    }

    pub async fn save_draft(&self, post: &PostData) -> Result<()> {
        let payload = serde_json::to_string(post)?;
        sqlx::query(
            "INSERT INTO local_drafts (post_id, payload, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (post_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(post.id.to_string())
        .bind(payload)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        self.notify(post.id);
        Ok(())
    }

    pub async fn draft(&self, post_id: Uuid) -> Result<Option<PostData>> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM local_drafts WHERE post_id = ?1")
                .bind(post_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        payload
            .map(|payload| serde_json::from_str(&payload).map_err(Into::into))
            .transpose()
    }

    pub async fn drafts(&self) -> Result<Vec<PostData>> {
        let payloads: Vec<String> =
            sqlx::query_scalar("SELECT payload FROM local_drafts ORDER BY updated_at DESC")
                .fetch_all(&self.pool)
                .await?;

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(Into::into))
            .collect()
    }

    pub async fn delete_draft(&self, post_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM local_drafts WHERE post_id = ?1")
            .bind(post_id.to_string())
            .execute(&self.pool)
            .await?;

        self.notify(post_id);
        Ok(result.rows_affected() > 0)
    }

    /// Live `images_by_post_id`: re-queried after every write to that post.
    pub fn watch_images_by_post_id(&self, post_id: Uuid) -> SnapshotStream<Vec<LocalImage>> {
        self.watch(Some(post_id), move |db| async move {
            db.images_by_post_id(post_id).await
        })
    }

    /// Live `all_unuploaded_images`: re-queried after any local write.
    pub fn watch_all_unuploaded_images(&self) -> SnapshotStream<Vec<LocalImage>> {
        self.watch(None, |db| async move { db.all_unuploaded_images().await })
    }

    fn watch<T, F, Fut>(&self, post_id: Option<Uuid>, query: F) -> SnapshotStream<T>
    where
        T: Send + 'static,
        F: Fn(LocalDb) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let query = Arc::new(query);
        let changes = self.changes.subscribe();

        stream::unfold(
            (self.clone(), changes, true),
            move |(db, mut changes, first)| {
                let query = Arc::clone(&query);
                async move {
                    if !first && !wait_for_change(&mut changes, post_id).await {
                        return None;
                    }
                    let snapshot = (*query)(db.clone()).await;
                    Some((snapshot, (db, changes, false)))
                }
            },
        )
        .boxed()
    }
}

async fn wait_for_change(changes: &mut broadcast::Receiver<Uuid>, post_id: Option<Uuid>) -> bool {
    loop {
        match changes.recv().await {
            Ok(changed) => {
                if post_id.map_or(true, |id| id == changed) {
                    return true;
                }
            }
            // Missed notifications; a fresh query covers them.
            Err(RecvError::Lagged(_)) => return true,
            Err(RecvError::Closed) => return false,
        }
    }
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.try_get(column)?;
    Uuid::parse_str(&value).map_err(|err| anyhow!("invalid {} {:?}: {}", column, value, err))
}

fn image_from_row(row: &SqliteRow) -> Result<LocalImage> {
    Ok(LocalImage {
        id: parse_uuid(row, "id")?,
        post_id: parse_uuid(row, "post_id")?,
        uri: row.try_get("uri")?,
        timestamp: row.try_get("timestamp")?,
        is_uploaded: row.try_get("is_uploaded")?,
        remote_url: row.try_get("remote_url")?,
    })
}
