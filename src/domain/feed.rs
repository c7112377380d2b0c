use serde::Serialize;
use uuid::Uuid;

use super::post::PostData;

/// Snapshot of what the feed screen shows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedState {
    pub posts: Vec<PostData>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Advisory completion of the most recent publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UploadProgress {
    pub post_id: Option<Uuid>,
    pub fraction: f32,
}
