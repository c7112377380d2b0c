#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use itshere::domain::feed::FeedState;
use itshere::domain::post::{NewPost, PostType, QuestionAnswer};
use itshere::domain::user::CurrentUser;
use itshere::infra::identity::SessionIdentity;
use itshere::infra::local_db::LocalDb;
use itshere::infra::memory::{MemoryDocumentStore, MemoryObjectStore};
use itshere::infra::ObjectStore;
use itshere::{AppState, PipelineOptions};

pub const USER_ID: &str = "user-1";
pub const USER_NAME: &str = "Mei";

// ---------------------------------------------------------------------------
// TestApp: one isolated instance per test, in-memory sqlite + memory remotes
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub state: AppState,
    pub identity: Arc<SessionIdentity>,
    pub objects: Arc<MemoryObjectStore>,
    pub documents: Arc<MemoryDocumentStore>,
    router: Router,
    sources: TempDir,
    image_dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub async fn app() -> TestApp {
    TestApp::setup(Some(CurrentUser::new(USER_ID, Some(USER_NAME.to_string())))).await
}

pub async fn signed_out_app() -> TestApp {
    TestApp::setup(None).await
}

impl TestApp {
    pub async fn setup(user: Option<CurrentUser>) -> Self {
        let objects = Arc::new(MemoryObjectStore::new());
        Self::with_objects(user, Arc::clone(&objects) as Arc<dyn ObjectStore>, objects).await
    }

    /// Builds the app around a custom object store; `objects` is still the
    /// memory store tests inspect.
    pub async fn with_objects(
        user: Option<CurrentUser>,
        store: Arc<dyn ObjectStore>,
        objects: Arc<MemoryObjectStore>,
    ) -> Self {
        // A single connection keeps the in-memory database alive and shared.
        let local = LocalDb::connect("sqlite::memory:", 1)
            .await
            .expect("LocalDb::connect failed");
        let identity = Arc::new(SessionIdentity::new(user));
        let documents = Arc::new(MemoryDocumentStore::new());
        let sources = tempfile::tempdir().expect("tempdir");
        let image_dir = tempfile::tempdir().expect("tempdir");

        let state = AppState::new(
            local,
            identity.clone(),
            store,
            documents.clone(),
            PipelineOptions {
                image_dir: image_dir.path().to_path_buf(),
                upload_concurrency: 2,
                max_images_per_post: 5,
            },
        );
        let router = itshere::http::router(state.clone());

        TestApp {
            state,
            identity,
            objects,
            documents,
            router,
            sources,
            image_dir,
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.image_dir.path().to_path_buf()
    }

    /// Writes a picked source image of exactly `len` bytes and returns its path.
    pub fn source_image(&self, name: &str, len: usize) -> String {
        let path = self.sources.path().join(name);
        std::fs::write(&path, jpeg_bytes(len)).expect("write source image");
        path.to_string_lossy().into_owned()
    }

    pub fn source_images(&self, lens: &[usize]) -> Vec<String> {
        lens.iter()
            .enumerate()
            .map(|(i, len)| self.source_image(&format!("pick_{}.jpg", i), *len))
            .collect()
    }

    /// Waits until the feed state satisfies `check`.
    pub async fn wait_for_feed<F>(&self, check: F) -> FeedState
    where
        F: Fn(&FeedState) -> bool,
    {
        let mut receiver = self.state.feed.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let state = receiver.borrow_and_update();
                    if check(&state) {
                        return state.clone();
                    }
                }
                receiver.changed().await.expect("feed state dropped");
            }
        })
        .await
        .expect("feed state never matched")
    }

    // ------------------------------------------------------------------
    // HTTP helpers
    // ------------------------------------------------------------------
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> TestResponse {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn post(&self, path: &str) -> TestResponse {
        self.request(Method::POST, path, None).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request(Method::DELETE, path, None).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// JPEG magic followed by zero padding up to `len` bytes.
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.resize(len.max(data.len()), 0);
    data
}

pub fn found_post(images: Vec<String>) -> NewPost {
    NewPost {
        id: None,
        title: "Silver keyring".into(),
        description: "Found near the east gate".into(),
        post_type: PostType::Found,
        phone: String::new(),
        date: "2024-05-01".into(),
        category: "Keys".into(),
        images,
        questions: vec![
            QuestionAnswer {
                question: "How many keys?".into(),
                answer: "Three".into(),
            },
            QuestionAnswer {
                question: "Keychain colour?".into(),
                answer: "Red".into(),
            },
            QuestionAnswer {
                question: "Brand of the fob?".into(),
                answer: "Acme".into(),
            },
        ],
        is_draft: false,
    }
}

pub fn lost_post(images: Vec<String>) -> NewPost {
    NewPost {
        id: None,
        title: "Black wallet".into(),
        description: "Lost on bus 12".into(),
        post_type: PostType::Lost,
        phone: "0912345678".into(),
        date: "2024-05-02".into(),
        category: "Wallets".into(),
        images,
        questions: Vec::new(),
        is_draft: false,
    }
}
