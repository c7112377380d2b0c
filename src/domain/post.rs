use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_millis;

pub const FOUND_QUESTION_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostType {
    Lost,
    Found,
}

/// Ownership check attached to FOUND posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

impl QuestionAnswer {
    fn is_complete(&self) -> bool {
        !self.question.trim().is_empty() && !self.answer.trim().is_empty()
    }
}

/// A post at any point of its life: local draft, partially uploaded, or durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostData {
    pub id: Uuid,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub post_type: PostType,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub local_image_uris: Vec<String>,
    #[serde(default)]
    pub questions: Vec<QuestionAnswer>,
    pub timestamp: i64,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_local_only: bool,
    #[serde(default)]
    pub needs_upload: bool,
}

impl PostData {
    /// Images to show. Remote URLs win whenever there are any.
    pub fn display_images(&self) -> &[String] {
        if self.image_urls.is_empty() {
            &self.local_image_uris
        } else {
            &self.image_urls
        }
    }
}

/// What a user composed on the create-post screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub post_type: PostType,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub category: String,
    /// Paths of the picked source images.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub questions: Vec<QuestionAnswer>,
    #[serde(default)]
    pub is_draft: bool,
}

impl NewPost {
    pub fn validate(&self, max_images: usize) -> Result<(), String> {
        if self.images.len() > max_images {
            return Err(format!("at most {} images are allowed", max_images));
        }
        if self.is_draft {
            return Ok(());
        }

        if self.title.trim().is_empty() {
            return Err("title is required".into());
        }
        if self.date.trim().is_empty() {
            return Err("date is required".into());
        }
        if self.category.trim().is_empty() {
            return Err("category is required".into());
        }
        if self.images.is_empty() {
            return Err("at least one image is required".into());
        }

        match self.post_type {
            PostType::Lost => {
                if self.phone.trim().is_empty() {
                    return Err("phone is required for lost items".into());
                }
            }
            PostType::Found => {
                let complete = self.questions.iter().filter(|q| q.is_complete()).count();
                if self.questions.len() != FOUND_QUESTION_COUNT || complete != FOUND_QUESTION_COUNT {
                    return Err(format!(
                        "found items need {} answered verification questions",
                        FOUND_QUESTION_COUNT
                    ));
                }
            }
        }

        Ok(())
    }

    /// Post skeleton with every pending flag set and no images attached yet.
    pub fn into_pending(self, id: Uuid, user_id: String, user_name: String) -> PostData {
        let questions = match self.post_type {
            PostType::Found => self.questions,
            PostType::Lost => Vec::new(),
        };

        PostData {
            id,
            user_id,
            user_name,
            title: self.title,
            description: self.description,
            post_type: self.post_type,
            phone: self.phone,
            date: self.date,
            category: self.category,
            image_urls: Vec::new(),
            local_image_uris: Vec::new(),
            questions,
            timestamp: now_millis(),
            is_favorite: false,
            is_draft: self.is_draft,
            is_local_only: true,
            needs_upload: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found_post() -> NewPost {
        NewPost {
            id: None,
            title: "Blue umbrella".into(),
            description: "Left at the library".into(),
            post_type: PostType::Found,
            phone: String::new(),
            date: "2024-05-01".into(),
            category: "Accessories".into(),
            images: vec!["/tmp/a.jpg".into()],
            questions: (1..=3)
                .map(|i| QuestionAnswer {
                    question: format!("q{}", i),
                    answer: format!("a{}", i),
                })
                .collect(),
            is_draft: false,
        }
    }

    #[test]
    fn display_images_prefers_remote_urls() {
        let mut post = found_post().into_pending(Uuid::new_v4(), "u".into(), "n".into());
        post.local_image_uris = vec!["/local/1.jpg".into()];
        assert_eq!(post.display_images(), ["/local/1.jpg".to_string()]);

        post.image_urls = vec!["https://cdn/1.jpg".into()];
        assert_eq!(post.display_images(), ["https://cdn/1.jpg".to_string()]);
    }

    #[test]
    fn found_posts_need_three_answered_questions() {
        let mut post = found_post();
        assert!(post.validate(5).is_ok());

        post.questions[1].answer = " ".into();
        assert!(post.validate(5).is_err());

        post.questions.pop();
        assert!(post.validate(5).is_err());
    }

    #[test]
    fn lost_posts_need_phone_and_drop_questions() {
        let mut post = found_post();
        post.post_type = PostType::Lost;
        assert_eq!(
            post.validate(5).unwrap_err(),
            "phone is required for lost items"
        );

        post.phone = "0912345678".into();
        assert!(post.validate(5).is_ok());

        let pending = post.into_pending(Uuid::new_v4(), "u".into(), "n".into());
        assert!(pending.questions.is_empty());
    }

    #[test]
    fn drafts_only_check_image_limit() {
        let mut post = found_post();
        post.is_draft = true;
        post.title.clear();
        post.images.clear();
        assert!(post.validate(5).is_ok());

        post.images = vec!["/tmp/x.jpg".into(); 6];
        assert!(post.validate(5).is_err());
    }

    #[test]
    fn post_type_serializes_upper_case() {
        let json = serde_json::to_string(&PostType::Found).unwrap();
        assert_eq!(json, "\"FOUND\"");
        let parsed: PostType = serde_json::from_str("\"LOST\"").unwrap();
        assert_eq!(parsed, PostType::Lost);
    }
}
