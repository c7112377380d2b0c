//! Feed Projection Tests
//!
//! Covers the merged feed: drafts first, no duplicate ids, local image and
//! favorite overlays, and live updates while the projector runs.

mod common;

use std::sync::Arc;

use common::{app, found_post, lost_post, TestApp, USER_ID, USER_NAME};
use itshere::domain::local_image::LocalImage;
use itshere::domain::post::PostData;
use itshere::infra::DocumentStore;
use uuid::Uuid;

fn remote_post(title: &str, timestamp: i64, image_urls: Vec<String>) -> PostData {
    let mut new_post = lost_post(Vec::new());
    new_post.title = title.into();
    let mut post = new_post.into_pending(Uuid::new_v4(), "someone-else".into(), "Ada".into());
    post.timestamp = timestamp;
    post.image_urls = image_urls;
    post.is_local_only = false;
    post.needs_upload = false;
    post
}

fn spawn_projector(app: &TestApp) {
    let feed = Arc::clone(&app.state.feed);
    tokio::spawn(async move { feed.run().await });
}

fn ids(posts: &[PostData]) -> Vec<Uuid> {
    posts.iter().map(|post| post.id).collect()
}

// ===========================================================================
// One-shot projection
// ===========================================================================

#[tokio::test]
async fn feed_starts_loading_until_first_snapshot() {
    let app = app().await;
    assert!(app.state.feed.current().is_loading);

    app.state.feed.load().await.unwrap();

    let state = app.state.feed.current();
    assert!(!state.is_loading);
    assert!(state.posts.is_empty());
    assert!(state.error.is_none());
}

#[tokio::test]
async fn drafts_come_before_remote_posts() {
    let app = app().await;
    let older = remote_post("older", 100, vec!["memory://objects/a".into()]);
    let newer = remote_post("newer", 200, vec!["memory://objects/b".into()]);
    app.documents.upsert_post(&older).await.unwrap();
    app.documents.upsert_post(&newer).await.unwrap();

    let mut new_post = found_post(app.source_images(&[10]));
    new_post.is_draft = true;
    let draft = app.state.coordinator.save_draft(new_post).await.unwrap();

    app.state.feed.load().await.unwrap();

    let posts = app.state.feed.current().posts;
    assert_eq!(ids(&posts), vec![draft.id, newer.id, older.id]);
    assert!(posts[0].is_draft);
    assert_eq!(posts[0].display_images(), draft.local_image_uris);
    assert!(!posts[1].is_draft);
}

#[tokio::test]
async fn remote_post_without_urls_shows_local_images() {
    let app = app().await;
    let post = remote_post("pending images", 100, Vec::new());
    app.documents.upsert_post(&post).await.unwrap();

    let mut staged = LocalImage::staged_at(post.id, "/staged/p_0.jpg", 1);
    staged.is_uploaded = true;
    app.state.local.insert(&staged).await.unwrap();

    app.state.feed.load().await.unwrap();

    let posts = app.state.feed.current().posts;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].local_image_uris, ["/staged/p_0.jpg"]);
    assert_eq!(posts[0].display_images(), ["/staged/p_0.jpg".to_string()]);
}

#[tokio::test]
async fn published_post_is_not_listed_twice() {
    let app = app().await;
    let mut new_post = lost_post(app.source_images(&[10, 20]));
    new_post.is_draft = true;
    let draft = app.state.coordinator.save_draft(new_post).await.unwrap();

    app.state.coordinator.publish_draft(draft.id).await.unwrap();
    app.state.feed.load().await.unwrap();

    let posts = app.state.feed.current().posts;
    assert_eq!(ids(&posts), vec![draft.id]);
    assert!(!posts[0].is_draft);
    assert_eq!(posts[0].image_urls.len(), 2);
    assert!(posts[0].local_image_uris.is_empty());
}

#[tokio::test]
async fn favorites_are_flagged() {
    let app = app().await;
    let liked = remote_post("liked", 200, vec!["memory://objects/a".into()]);
    let other = remote_post("other", 100, vec!["memory://objects/b".into()]);
    app.documents.upsert_post(&liked).await.unwrap();
    app.documents.upsert_post(&other).await.unwrap();
    app.state.feed.load().await.unwrap();

    assert_eq!(app.state.favorites.toggle(liked.id).await.unwrap(), Some(true));

    let posts = app.state.feed.current().posts;
    assert!(posts[0].is_favorite);
    assert!(!posts[1].is_favorite);
    assert!(app.state.favorites.favorite_ids().await.unwrap().contains(&liked.id));

    assert_eq!(app.state.favorites.toggle(liked.id).await.unwrap(), Some(false));
    assert!(!app.state.feed.current().posts[0].is_favorite);
}

// ===========================================================================
// Live projection
// ===========================================================================

#[tokio::test]
async fn running_feed_follows_remote_and_local_changes() {
    let app = app().await;
    spawn_projector(&app);
    app.wait_for_feed(|state| !state.is_loading).await;

    let remote = remote_post("from another device", 100, vec!["memory://objects/r".into()]);
    app.documents.upsert_post(&remote).await.unwrap();
    app.wait_for_feed(|state| ids(&state.posts) == vec![remote.id])
        .await;

    let mut new_post = found_post(app.source_images(&[10]));
    new_post.is_draft = true;
    let draft = app.state.coordinator.save_draft(new_post).await.unwrap();
    let state = app
        .wait_for_feed(|state| ids(&state.posts) == vec![draft.id, remote.id])
        .await;
    assert!(state.posts[0].is_draft);
}

#[tokio::test]
async fn running_feed_shows_published_post_once() {
    let app = app().await;
    spawn_projector(&app);
    app.wait_for_feed(|state| !state.is_loading).await;

    let report = app
        .state
        .coordinator
        .publish(found_post(app.source_images(&[10, 20])))
        .await
        .unwrap();
    let post_id = report.post.id;

    let state = app
        .wait_for_feed(|state| {
            state.posts.len() == 1
                && state.posts[0].id == post_id
                && !state.posts[0].is_draft
                && state.posts[0].image_urls.len() == 2
        })
        .await;
    assert_eq!(state.posts[0].user_id, USER_ID);
    assert_eq!(state.posts[0].user_name, USER_NAME);
}

#[tokio::test]
async fn optimistic_post_survives_concurrent_refresh() {
    let app = app().await;
    app.state.feed.load().await.unwrap();

    let mut new_post = lost_post(app.source_images(&[10]));
    new_post.is_draft = true;
    app.state.coordinator.save_draft(new_post).await.unwrap();

    let published = remote_post("just published", 300, vec!["memory://objects/p".into()]);
    tokio::join!(
        app.state.feed.refresh(),
        app.state.feed.prepend(published.clone()),
        app.state.feed.refresh(),
    );

    let posts = app.state.feed.current().posts;
    assert!(posts.iter().any(|post| post.id == published.id));

    app.state.feed.refresh().await;
    let posts = app.state.feed.current().posts;
    assert_eq!(posts.iter().filter(|post| post.id == published.id).count(), 1);
}
