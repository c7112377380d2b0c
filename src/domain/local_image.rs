use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One image staged on this device for a post that may not exist remotely yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalImage {
    pub id: Uuid,
    pub post_id: Uuid,
    pub uri: String,
    pub timestamp: i64,
    pub is_uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

impl LocalImage {
    pub fn staged_at(post_id: Uuid, uri: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            uri: uri.into(),
            timestamp,
            is_uploaded: false,
            remote_url: None,
        }
    }
}
