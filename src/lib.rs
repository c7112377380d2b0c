pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::path::PathBuf;
use std::sync::Arc;

use crate::app::drafts::DraftAssembler;
use crate::app::favorites::FavoriteService;
use crate::app::feed::FeedProjector;
use crate::app::publish::UploadCoordinator;
use crate::app::staging::ImageStager;
use crate::infra::local_db::LocalDb;
use crate::infra::{DocumentStore, IdentityProvider, ObjectStore};

#[derive(Clone)]
pub struct AppState {
    pub local: LocalDb,
    pub identity: Arc<dyn IdentityProvider>,
    pub objects: Arc<dyn ObjectStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub drafts: DraftAssembler,
    pub feed: Arc<FeedProjector>,
    pub coordinator: Arc<UploadCoordinator>,
    pub favorites: FavoriteService,
    pub max_images_per_post: usize,
}

/// Knobs of the publish pipeline that come from configuration.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub image_dir: PathBuf,
    pub upload_concurrency: usize,
    pub max_images_per_post: usize,
}

impl AppState {
    pub fn new(
        local: LocalDb,
        identity: Arc<dyn IdentityProvider>,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        options: PipelineOptions,
    ) -> Self {
        let feed = Arc::new(FeedProjector::new(
            local.clone(),
            Arc::clone(&documents),
            Arc::clone(&identity),
        ));
        let coordinator = Arc::new(UploadCoordinator::new(
            local.clone(),
            ImageStager::new(options.image_dir),
            Arc::clone(&identity),
            Arc::clone(&objects),
            Arc::clone(&documents),
            Arc::clone(&feed),
            options.upload_concurrency,
            options.max_images_per_post,
        ));
        let favorites = FavoriteService::new(
            Arc::clone(&identity),
            Arc::clone(&documents),
            Arc::clone(&feed),
        );

        Self {
            drafts: DraftAssembler::new(local.clone()),
            local,
            identity,
            objects,
            documents,
            feed,
            coordinator,
            favorites,
            max_images_per_post: options.max_images_per_post,
        }
    }
}
