use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use uuid::Uuid;

use crate::domain::local_image::LocalImage;
use crate::domain::now_millis;

const DEFAULT_EXTENSION: &str = "jpg";

/// Copies picked images into the app's own directory so staged rows never
/// point at files the user can move or delete.
#[derive(Clone, Debug)]
pub struct ImageStager {
    image_dir: PathBuf,
}

impl ImageStager {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
        }
    }

    /// Copies `sources` as `{post_id}_{index}.{ext}`, numbering from
    /// `first_index`, and returns the rows to insert. Timestamps follow the
    /// order of `sources` and never start before `not_before`.
    ///
    /// A failed copy removes the files already copied by this call.
    pub async fn stage(
        &self,
        post_id: Uuid,
        first_index: usize,
        not_before: i64,
        sources: &[String],
    ) -> Result<Vec<LocalImage>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.image_dir)
            .await
            .map_err(|err| anyhow!("cannot create {}: {}", self.image_dir.display(), err))?;

        let staged_at = now_millis().max(not_before);
        let mut images = Vec::with_capacity(sources.len());
        for (offset, source) in sources.iter().enumerate() {
            let file_name = format!(
                "{}_{}.{}",
                post_id,
                first_index + offset,
                extension_of(source)
            );
            let destination = self.image_dir.join(file_name);

            let copied = match tokio::fs::copy(source, &destination).await {
                Ok(_) => tokio::fs::canonicalize(&destination).await,
                Err(err) => Err(err),
            };
            let absolute = match copied {
                Ok(absolute) => absolute,
                Err(err) => {
                    self.remove_files(images.iter().map(|image: &LocalImage| image.uri.as_str()).collect::<Vec<_>>())
                        .await;
                    return Err(anyhow!("cannot copy {}: {}", source, err));
                }
            };

            tracing::debug!(post_id = %post_id, path = %absolute.display(), "image staged");
            images.push(LocalImage::staged_at(
                post_id,
                absolute.to_string_lossy().into_owned(),
                staged_at + offset as i64,
            ));
        }

        Ok(images)
    }

    /// Best-effort removal of staged copies. Files outside the image
    /// directory are never touched.
    pub async fn remove_files<'a, I>(&self, uris: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Ok(root) = tokio::fs::canonicalize(&self.image_dir).await else {
            return;
        };

        for uri in uris {
            let path = Path::new(uri);
            if !path.starts_with(&root) {
                continue;
            }
            if let Err(err) = tokio::fs::remove_file(path).await {
                tracing::warn!(error = %err, path = %uri, "failed to remove staged image");
            }
        }
    }
}

fn extension_of(source: &str) -> String {
    let extension = Path::new(source)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpeg") => "jpg".to_string(),
        Some(ext @ ("jpg" | "png" | "webp")) => ext.to_string(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_extensions() {
        assert_eq!(extension_of("/sdcard/DCIM/IMG_1.JPEG"), "jpg");
        assert_eq!(extension_of("photo.png"), "png");
        assert_eq!(extension_of("content-without-extension"), "jpg");
        assert_eq!(extension_of("clip.heic"), "jpg");
    }

    #[tokio::test]
    async fn stage_copies_in_order() {
        let sources_dir = tempfile::tempdir().unwrap();
        let image_dir = tempfile::tempdir().unwrap();
        let mut sources = Vec::new();
        for name in ["a.png", "b.jpg"] {
            let path = sources_dir.path().join(name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            sources.push(path.to_string_lossy().into_owned());
        }

        let stager = ImageStager::new(image_dir.path());
        let post_id = Uuid::new_v4();
        let images = stager.stage(post_id, 2, 0, &sources).await.unwrap();

        assert_eq!(images.len(), 2);
        assert!(images[0].timestamp < images[1].timestamp);
        assert!(images[0].uri.ends_with(&format!("{}_2.png", post_id)));
        assert!(images[1].uri.ends_with(&format!("{}_3.jpg", post_id)));
        assert_eq!(std::fs::read(&images[1].uri).unwrap(), b"b.jpg");

        stager
            .remove_files(images.iter().map(|image| image.uri.as_str()).collect::<Vec<_>>())
            .await;
        assert!(!Path::new(&images[0].uri).exists());
    }

    #[tokio::test]
    async fn later_batch_starts_after_not_before() {
        let sources_dir = tempfile::tempdir().unwrap();
        let image_dir = tempfile::tempdir().unwrap();
        let source = sources_dir.path().join("a.jpg");
        std::fs::write(&source, b"a").unwrap();
        let sources = vec![source.to_string_lossy().into_owned(); 2];

        let stager = ImageStager::new(image_dir.path());
        let not_before = now_millis() + 60_000;
        let images = stager
            .stage(Uuid::new_v4(), 0, not_before, &sources)
            .await
            .unwrap();

        assert_eq!(images[0].timestamp, not_before);
        assert_eq!(images[1].timestamp, not_before + 1);
    }

    #[tokio::test]
    async fn failed_copy_leaves_no_files_behind() {
        let sources_dir = tempfile::tempdir().unwrap();
        let image_dir = tempfile::tempdir().unwrap();
        let present = sources_dir.path().join("a.jpg");
        std::fs::write(&present, b"a").unwrap();
        let sources = vec![
            present.to_string_lossy().into_owned(),
            sources_dir.path().join("missing.jpg").to_string_lossy().into_owned(),
        ];

        let stager = ImageStager::new(image_dir.path());
        assert!(stager.stage(Uuid::new_v4(), 0, 0, &sources).await.is_err());
        assert_eq!(std::fs::read_dir(image_dir.path()).unwrap().count(), 0);
    }
}
