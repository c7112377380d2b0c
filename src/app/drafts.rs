use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use uuid::Uuid;

use crate::domain::local_image::LocalImage;
use crate::domain::post::{PostData, PostType};
use crate::infra::local_db::LocalDb;

/// Rebuilds unpublished posts from what is stored on the device.
#[derive(Clone)]
pub struct DraftAssembler {
    local: LocalDb,
}

impl DraftAssembler {
    pub fn new(local: LocalDb) -> Self {
        Self { local }
    }

    /// Drafts, most recently edited first.
    ///
    /// Posts with stored metadata show every staged image, uploaded or not,
    /// which includes posts whose document write failed after their images
    /// went up. Posts without metadata are rebuilt from their unuploaded
    /// images alone.
    pub async fn assemble(&self) -> Result<Vec<PostData>> {
        let metadata: HashMap<Uuid, PostData> = self
            .local
            .drafts()
            .await?
            .into_iter()
            .map(|post| (post.id, post))
            .collect();
        let orphaned: Vec<LocalImage> = self
            .local
            .all_unuploaded_images()
            .await?
            .into_iter()
            .filter(|image| !metadata.contains_key(&image.post_id))
            .collect();

        let mut drafts = group_images(orphaned, &metadata);
        for (post_id, stored) in &metadata {
            let images = self.local.images_by_post_id(*post_id).await?;
            drafts.push(synthesize(*post_id, Some(stored), &images));
        }

        drafts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(drafts)
    }

    pub async fn draft(&self, post_id: Uuid) -> Result<Option<PostData>> {
        let stored = self.local.draft(post_id).await?;
        let images = self.local.images_by_post_id(post_id).await?;
        if stored.is_none() && images.iter().all(|image| image.is_uploaded) {
            return Ok(None);
        }

        let pending: Vec<LocalImage> = if stored.is_some() {
            images
        } else {
            images.into_iter().filter(|image| !image.is_uploaded).collect()
        };
        Ok(Some(synthesize(post_id, stored.as_ref(), &pending)))
    }
}

/// One draft per `post_id` among `images`, overlaid with stored metadata.
pub fn group_images(images: Vec<LocalImage>, metadata: &HashMap<Uuid, PostData>) -> Vec<PostData> {
    let mut groups: BTreeMap<Uuid, Vec<LocalImage>> = BTreeMap::new();
    for image in images {
        groups.entry(image.post_id).or_default().push(image);
    }

    groups
        .into_iter()
        .map(|(post_id, mut images)| {
            images.sort_by_key(|image| image.timestamp);
            synthesize(post_id, metadata.get(&post_id), &images)
        })
        .collect()
}

fn synthesize(post_id: Uuid, stored: Option<&PostData>, images: &[LocalImage]) -> PostData {
    let mut draft = stored.cloned().unwrap_or_else(|| blank_draft(post_id));

    let mut seen = HashSet::new();
    draft.local_image_uris = images
        .iter()
        .filter(|image| seen.insert(image.uri.as_str()))
        .map(|image| image.uri.clone())
        .collect();
    draft.image_urls.clear();
    if let Some(latest) = images.iter().map(|image| image.timestamp).max() {
        draft.timestamp = latest;
    }
    draft.is_draft = true;
    draft.is_local_only = true;
    draft.needs_upload = true;
    draft.is_favorite = false;
    draft
}

fn blank_draft(post_id: Uuid) -> PostData {
    PostData {
        id: post_id,
        user_id: String::new(),
        user_name: String::new(),
        title: String::new(),
        description: String::new(),
        post_type: PostType::Found,
        phone: String::new(),
        date: String::new(),
        category: String::new(),
        image_urls: Vec::new(),
        local_image_uris: Vec::new(),
        questions: Vec::new(),
        timestamp: 0,
        is_favorite: false,
        is_draft: true,
        is_local_only: true,
        needs_upload: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_post_and_takes_latest_timestamp() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let images = vec![
            LocalImage::staged_at(first, "/img/a.jpg", 30),
            LocalImage::staged_at(second, "/img/x.jpg", 5),
            LocalImage::staged_at(first, "/img/b.jpg", 10),
            LocalImage::staged_at(first, "/img/c.jpg", 20),
        ];

        let drafts = group_images(images, &HashMap::new());
        assert_eq!(drafts.len(), 2);

        let draft = drafts.iter().find(|d| d.id == first).unwrap();
        assert_eq!(draft.local_image_uris, ["/img/b.jpg", "/img/c.jpg", "/img/a.jpg"]);
        assert_eq!(draft.timestamp, 30);
        assert!(draft.is_draft && draft.is_local_only && draft.needs_upload);
        assert!(draft.image_urls.is_empty());
    }

    #[test]
    fn duplicate_uris_appear_once() {
        let post_id = Uuid::new_v4();
        let images = vec![
            LocalImage::staged_at(post_id, "/img/a.jpg", 1),
            LocalImage::staged_at(post_id, "/img/a.jpg", 2),
        ];

        let drafts = group_images(images, &HashMap::new());
        assert_eq!(drafts[0].local_image_uris, ["/img/a.jpg"]);
    }

    #[test]
    fn stored_metadata_is_kept() {
        let post_id = Uuid::new_v4();
        let mut stored = blank_draft(post_id);
        stored.title = "Black wallet".into();
        stored.post_type = PostType::Lost;
        stored.timestamp = 1;
        let metadata = HashMap::from([(post_id, stored)]);

        let drafts = group_images(vec![LocalImage::staged_at(post_id, "/img/w.jpg", 99)], &metadata);
        assert_eq!(drafts[0].title, "Black wallet");
        assert_eq!(drafts[0].post_type, PostType::Lost);
        assert_eq!(drafts[0].timestamp, 99);
    }
}
