use crate::config::settings::AppConfig;
use crate::infrastructure::storage::BlobStore;
use crate::modules::clip::repository::ClipStore;
use crate::workers::scheduler::JobScheduler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub clips: Arc<dyn ClipStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub scheduler: Arc<JobScheduler>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        clips: Arc<dyn ClipStore>,
        blobs: Arc<dyn BlobStore>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            config,
            clips,
            blobs,
            scheduler,
        }
    }
}
