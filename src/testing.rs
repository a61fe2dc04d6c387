//! In-memory stand-ins for MinIO and Postgres used by unit tests.

use crate::config::settings::AppConfig;
use crate::infrastructure::storage::{BlobBody, BlobKey, BlobStore, StorageError};
use crate::modules::clip::model::{Clip, ClipChanges, NewClip};
use crate::modules::clip::repository::{ClipStore, PendingInsert, RepositoryError};
use crate::state::AppState;
use crate::workers::progress::{ProgressHandle, ProgressTracker};
use crate::workers::scheduler::{
    ClipProcessor, JobScheduler, ProcessError, QueuePolicy, SchedulerConfig,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<BlobKey, Vec<u8>>>,
    pub fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn insert(&self, key: BlobKey, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key, data.into());
    }

    pub fn object(&self, key: &BlobKey) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &BlobKey) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, mut body: BlobBody<'_>) -> Result<u64, StorageError> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.insert(key.clone(), data);
        Ok(len)
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobBody<'static>, StorageError> {
        let data = self
            .object(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        Ok(Box::pin(std::io::Cursor::new(data)))
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("delete refused".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct Rows {
    committed: BTreeMap<i64, Clip>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryClipStore {
    rows: Arc<Mutex<Rows>>,
    pub fail_commit: Arc<AtomicBool>,
}

impl MemoryClipStore {
    pub fn seed(&self, creator_id: i64, title: &str, processing: bool) -> Clip {
        let mut rows = self.rows.lock().unwrap();
        rows.next_id += 1;
        let clip = Clip {
            id: rows.next_id,
            creator_id,
            processing,
            title: title.to_string(),
            description: String::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        rows.committed.insert(clip.id, clip.clone());
        clip
    }

    pub fn row(&self, id: i64) -> Option<Clip> {
        self.rows.lock().unwrap().committed.get(&id).cloned()
    }
}

struct MemoryPendingInsert {
    rows: Arc<Mutex<Rows>>,
    clip: Clip,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl PendingInsert for MemoryPendingInsert {
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }
        let mut rows = self.rows.lock().unwrap();
        rows.committed.insert(self.clip.id, self.clip);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[async_trait]
impl ClipStore for MemoryClipStore {
    async fn begin_insert(
        &self,
        draft: &NewClip,
        creator_id: i64,
    ) -> Result<(Clip, Box<dyn PendingInsert>), RepositoryError> {
        let id = {
            let mut rows = self.rows.lock().unwrap();
            rows.next_id += 1;
            rows.next_id
        };
        let clip = Clip {
            id,
            creator_id,
            processing: true,
            title: draft.title.clone(),
            description: draft.description.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        let pending = MemoryPendingInsert {
            rows: Arc::clone(&self.rows),
            clip: clip.clone(),
            fail_commit: Arc::clone(&self.fail_commit),
        };
        Ok((clip, Box::new(pending)))
    }

    async fn find(&self, id: i64) -> Result<Option<Clip>, RepositoryError> {
        Ok(self.row(id))
    }

    async fn find_many(&self, ids: &[i64]) -> Result<Vec<Clip>, RepositoryError> {
        let rows = self.rows.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| rows.committed.get(id).cloned())
            .collect())
    }

    async fn find_processing(&self) -> Result<Vec<Clip>, RepositoryError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .committed
            .values()
            .filter(|clip| clip.processing)
            .cloned()
            .collect())
    }

    async fn list(&self, before: Option<i64>, limit: i64) -> Result<Vec<Clip>, RepositoryError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .committed
            .values()
            .rev()
            .filter(|clip| before.is_none_or(|before| clip.id < before))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<Clip>, RepositoryError> {
        let needle = query.to_lowercase();
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .committed
            .values()
            .filter(|clip| {
                format!("{} {}", clip.title, clip.description)
                    .to_lowercase()
                    .contains(&needle)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: i64,
        changes: &ClipChanges,
    ) -> Result<Option<Clip>, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.committed.get_mut(&id).map(|clip| {
            if let Some(title) = &changes.title {
                clip.title = title.clone();
            }
            if let Some(description) = &changes.description {
                clip.description = description.clone();
            }
            clip.clone()
        }))
    }

    async fn set_processing(&self, id: i64, processing: bool) -> Result<(), RepositoryError> {
        if let Some(clip) = self.rows.lock().unwrap().committed.get_mut(&id) {
            clip.processing = processing;
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.rows.lock().unwrap().committed.remove(&id);
        Ok(())
    }
}

pub const JWT_SECRET: &str = "test-secret";

pub fn test_config(max_upload_size_bytes: u64) -> AppConfig {
    AppConfig {
        server_port: 0,
        blob_proxy_port: 0,
        database_url: String::new(),
        minio_url: String::new(),
        minio_bucket: "clips".to_string(),
        minio_access_key: String::new(),
        minio_secret_key: String::new(),
        jwt_secret: JWT_SECRET.to_string(),
        max_upload_size_bytes,
        transcoder_workers: 1,
        transcoder_backlog: 16,
        transcoder_queue_policy: QueuePolicy::Block,
        progress_shards: 4,
        ffmpeg_path: "ffmpeg".to_string(),
        ffprobe_path: "ffprobe".to_string(),
    }
}

/// Accepts every clip without doing anything.
pub struct NoopProcessor;

#[async_trait]
impl ClipProcessor for NoopProcessor {
    async fn process(&self, _clip: &Clip, _progress: ProgressHandle) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// State backed by the in-memory stores, with a scheduler that is never
/// started so queued clips stay observable.
pub fn test_state(
    clips: Arc<MemoryClipStore>,
    blobs: Arc<MemoryBlobStore>,
    max_upload_size_bytes: u64,
) -> AppState {
    let config = test_config(max_upload_size_bytes);
    let scheduler = JobScheduler::new(
        SchedulerConfig {
            workers: 1,
            backlog: 16,
            policy: QueuePolicy::Block,
        },
        Arc::new(NoopProcessor),
        Arc::new(ProgressTracker::new(config.progress_shards)),
    );
    AppState::new(config, clips, blobs, Arc::new(scheduler))
}
