use std::sync::Arc;

use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use itshere::config::{AppConfig, AppMode};
use itshere::domain::user::CurrentUser;
use itshere::infra::documents::RedisDocumentStore;
use itshere::infra::identity::SessionIdentity;
use itshere::infra::local_db::LocalDb;
use itshere::infra::memory::{MemoryDocumentStore, MemoryObjectStore};
use itshere::infra::storage::S3ObjectStorage;
use itshere::infra::{DocumentStore, IdentityProvider, ObjectStore};
use itshere::{http, AppState, PipelineOptions};

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let local = LocalDb::connect(&config.local_db_url, config.local_db_max_connections).await?;
    let identity: Arc<dyn IdentityProvider> = Arc::new(SessionIdentity::new(
        config
            .user_id
            .clone()
            .map(|id| CurrentUser::new(id, config.user_name.clone())),
    ));

    let (objects, documents): (Arc<dyn ObjectStore>, Arc<dyn DocumentStore>) =
        match config.app_mode {
            AppMode::Api | AppMode::Sync => (
                Arc::new(S3ObjectStorage::new(&config).await?),
                Arc::new(RedisDocumentStore::connect(&config.redis_url).await?),
            ),
            AppMode::Offline => {
                tracing::warn!("offline mode: published posts are kept in memory only");
                (
                    Arc::new(MemoryObjectStore::new()),
                    Arc::new(MemoryDocumentStore::new()),
                )
            }
        };

    let state = AppState::new(
        local,
        identity,
        objects,
        documents,
        PipelineOptions {
            image_dir: config.image_dir.clone(),
            upload_concurrency: config.upload_concurrency,
            max_images_per_post: config.max_images_per_post,
        },
    );

    if config.app_mode == AppMode::Sync {
        return sync_pending_drafts(&state).await;
    }

    let feed = Arc::clone(&state.feed);
    tokio::spawn(async move {
        if let Err(err) = feed.run().await {
            tracing::error!(error = ?err, "feed subscription stopped");
        }
    });

    let app: Router = http::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn sync_pending_drafts(state: &AppState) -> anyhow::Result<()> {
    let outcomes = state.coordinator.publish_all_drafts().await?;
    let mut failures = 0;
    for (post_id, outcome) in &outcomes {
        match outcome {
            Ok(report) => tracing::info!(
                post_id = %post_id,
                images = report.post.image_urls.len(),
                skipped = report.failed.len(),
                "draft published"
            ),
            Err(err) => {
                failures += 1;
                tracing::error!(post_id = %post_id, error = %err, "draft not published");
            }
        }
    }

    tracing::info!(drafts = outcomes.len(), failures, "sync finished");
    if failures > 0 {
        anyhow::bail!("{} of {} drafts failed to publish", failures, outcomes.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
