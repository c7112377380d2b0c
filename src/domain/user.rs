use serde::{Deserialize, Serialize};

const ANONYMOUS_NAME: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name,
        }
    }

    /// Name stamped on published posts.
    pub fn author_name(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => ANONYMOUS_NAME.to_string(),
        }
    }
}
