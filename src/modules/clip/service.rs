use super::dto::{
    ClipResponse, CreateClipRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, ProgressResponse,
    SEARCH_LIMIT, UpdateClipRequest,
};
use super::model::{Clip, ClipChanges, NewClip};
use super::repository::RepositoryError;
use super::transaction::{UploadError, UploadTransaction};
use crate::common::hash_id::HashId;
use crate::common::response::ApiError;
use crate::infrastructure::storage::BlobBody;
use crate::state::AppState;
use crate::workers::scheduler::SchedulerError;
use axum::http::StatusCode;
use std::collections::HashMap;
use tracing::{error, info, warn};
use validator::Validate;

#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    #[error("Clip not found")]
    NotFound,
    #[error("You do not own this clip")]
    Forbidden,
    #[error("{0}")]
    Invalid(String),
    #[error("Video too large")]
    TooLarge,
    #[error(transparent)]
    Upload(UploadError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl From<UploadError> for ClipError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::TooLarge { .. } => Self::TooLarge,
            other => Self::Upload(other),
        }
    }
}

impl From<validator::ValidationErrors> for ClipError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<ClipError> for ApiError {
    fn from(e: ClipError) -> Self {
        let status = match &e {
            ClipError::NotFound => StatusCode::NOT_FOUND,
            ClipError::Forbidden => StatusCode::FORBIDDEN,
            ClipError::Invalid(_) => StatusCode::BAD_REQUEST,
            ClipError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ClipError::Scheduler(SchedulerError::BacklogFull { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ClipError::Upload(_) | ClipError::Repository(_) | ClipError::Scheduler(_) => {
                error!(error = %e, "Clip request failed");
                return ApiError(
                    "Internal Server Error".to_string(),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };
        ApiError(e.to_string(), status)
    }
}

/// What a list or search returned; an empty page is answered with 204.
pub enum Page {
    Empty,
    Clips(Vec<ClipResponse>),
}

impl From<Vec<Clip>> for Page {
    fn from(clips: Vec<Clip>) -> Self {
        if clips.is_empty() {
            Self::Empty
        } else {
            Self::Clips(clips.into_iter().map(ClipResponse::from).collect())
        }
    }
}

pub enum Progress {
    /// None of the requested clips exists.
    Unknown,
    /// The clips exist but none is being tracked.
    Idle,
    Tracked(ProgressResponse),
}

pub struct ClipService;

impl ClipService {
    /// Saga: row + raw blob, commit, then hand the clip to the scheduler.
    pub async fn upload(
        state: &AppState,
        creator_id: i64,
        req: CreateClipRequest,
        video: BlobBody<'_>,
    ) -> Result<ClipResponse, ClipError> {
        req.validate()?;
        let draft = NewClip::from(req);

        let mut tx = UploadTransaction::begin(
            state.clips.as_ref(),
            state.blobs.clone(),
            &draft,
            creator_id,
            state.config.max_upload_size_bytes,
        )
        .await?;

        let result = Self::store_and_commit(&mut tx, video).await;

        // No-op once committed.
        if let Err(e) = tx.rollback().await {
            warn!(clip_id = tx.clip().id, error = %e, "Upload rollback was incomplete");
        }
        result?;

        let clip = tx.clip().clone();
        info!(clip_id = clip.id, creator_id, "📼 Clip uploaded");

        // The row is committed with processing set, so recovery picks it up
        // on the next start if queueing fails here.
        state.scheduler.queue(clip.clone()).await?;

        Ok(clip.into())
    }

    async fn store_and_commit(
        tx: &mut UploadTransaction,
        video: BlobBody<'_>,
    ) -> Result<(), UploadError> {
        let written = tx.upload_raw(video).await?;
        tx.commit().await?;
        info!(clip_id = tx.clip().id, bytes = written, "Stored raw upload");
        Ok(())
    }

    pub async fn get(state: &AppState, id: HashId) -> Result<ClipResponse, ClipError> {
        let clip = state.clips.find(id.0).await?.ok_or(ClipError::NotFound)?;
        Ok(clip.into())
    }

    pub async fn list(
        state: &AppState,
        before: Option<HashId>,
        limit: Option<i64>,
    ) -> Result<Page, ClipError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let clips = state.clips.list(before.map(|id| id.0), limit).await?;
        Ok(clips.into())
    }

    pub async fn search(state: &AppState, query: &str) -> Result<Page, ClipError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Page::Empty);
        }
        let clips = state.clips.search(query, SEARCH_LIMIT).await?;
        Ok(clips.into())
    }

    pub async fn progress(state: &AppState, ids: &[HashId]) -> Result<Progress, ClipError> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let clips = state.clips.find_many(&ids).await?;
        if clips.is_empty() {
            return Ok(Progress::Unknown);
        }

        let tracked: HashMap<HashId, i32> = clips
            .iter()
            .filter(|clip| clip.processing)
            .filter_map(|clip| {
                state
                    .scheduler
                    .progress(clip.id)
                    .map(|percent| (HashId(clip.id), percent))
            })
            .collect();

        if tracked.is_empty() {
            return Ok(Progress::Idle);
        }
        Ok(Progress::Tracked(ProgressResponse { clips: tracked }))
    }

    async fn owned(state: &AppState, id: i64, user_id: i64) -> Result<Clip, ClipError> {
        let clip = state.clips.find(id).await?.ok_or(ClipError::NotFound)?;
        if clip.creator_id != user_id {
            return Err(ClipError::Forbidden);
        }
        Ok(clip)
    }

    pub async fn update(
        state: &AppState,
        id: HashId,
        user_id: i64,
        req: UpdateClipRequest,
    ) -> Result<ClipResponse, ClipError> {
        req.validate()?;
        Self::owned(state, id.0, user_id).await?;

        let clip = state
            .clips
            .update(id.0, &ClipChanges::from(req))
            .await?
            .ok_or(ClipError::NotFound)?;

        Ok(clip.into())
    }

    pub async fn delete(state: &AppState, id: HashId, user_id: i64) -> Result<(), ClipError> {
        Self::owned(state, id.0, user_id).await?;
        state.clips.delete(id.0).await?;
        info!(clip_id = id.0, "🗑️ Clip deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::BlobKey;
    use crate::testing::{MemoryBlobStore, MemoryClipStore, test_state};
    use crate::workers::progress::QUEUED;
    use std::sync::Arc;

    fn body(bytes: &'static [u8]) -> BlobBody<'static> {
        Box::pin(bytes)
    }

    fn request(title: &str) -> CreateClipRequest {
        CreateClipRequest {
            title: title.to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn upload_commits_stores_and_queues() {
        let clips = Arc::new(MemoryClipStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(clips.clone(), blobs.clone(), 64);

        let clip = ClipService::upload(&state, 4, request("first"), body(b"video"))
            .await
            .unwrap();

        let id = clip.id.0;
        assert!(clips.row(id).unwrap().processing);
        assert_eq!(blobs.object(&BlobKey::raw(id)), Some(b"video".to_vec()));
        // The scheduler has not been started, so the clip waits in the backlog.
        assert_eq!(state.scheduler.progress(id), Some(QUEUED));
    }

    #[tokio::test]
    async fn oversized_upload_leaves_nothing_behind() {
        let clips = Arc::new(MemoryClipStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(clips.clone(), blobs.clone(), 4);

        let err = ClipService::upload(&state, 4, request("big"), body(b"12345"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClipError::TooLarge));
        assert!(clips.row(1).is_none());
        assert!(!blobs.contains(&BlobKey::raw(1)));
        assert_eq!(state.scheduler.progress(1), None);

        let api: ApiError = err.into();
        assert_eq!(api.1, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected_before_anything_is_written() {
        let clips = Arc::new(MemoryClipStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(clips.clone(), blobs.clone(), 64);

        let err = ClipService::upload(&state, 4, request(""), body(b"v"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClipError::Invalid(_)));
        assert!(clips.row(1).is_none());
    }

    #[tokio::test]
    async fn only_the_owner_may_update_or_delete() {
        let clips = Arc::new(MemoryClipStore::default());
        let state = test_state(clips.clone(), Arc::default(), 64);
        let clip = clips.seed(7, "mine", false);

        let change = || UpdateClipRequest {
            title: Some("renamed".to_string()),
            description: None,
        };

        let err = ClipService::update(&state, HashId(clip.id), 8, change())
            .await
            .unwrap_err();
        assert!(matches!(err, ClipError::Forbidden));

        let updated = ClipService::update(&state, HashId(clip.id), 7, change())
            .await
            .unwrap();
        assert_eq!(updated.title, "renamed");

        assert!(matches!(
            ClipService::delete(&state, HashId(clip.id), 8).await,
            Err(ClipError::Forbidden)
        ));
        ClipService::delete(&state, HashId(clip.id), 7).await.unwrap();
        assert!(clips.row(clip.id).is_none());
    }

    #[tokio::test]
    async fn progress_distinguishes_unknown_idle_and_tracked() {
        let clips = Arc::new(MemoryClipStore::default());
        let state = test_state(clips.clone(), Arc::default(), 64);

        assert!(matches!(
            ClipService::progress(&state, &[HashId(99)]).await.unwrap(),
            Progress::Unknown
        ));

        let done = clips.seed(1, "done", false);
        assert!(matches!(
            ClipService::progress(&state, &[HashId(done.id)]).await.unwrap(),
            Progress::Idle
        ));

        let pending = clips.seed(1, "pending", true);
        state.scheduler.queue(pending.clone()).await.unwrap();

        match ClipService::progress(&state, &[HashId(done.id), HashId(pending.id)])
            .await
            .unwrap()
        {
            Progress::Tracked(res) => {
                assert_eq!(res.clips.len(), 1);
                assert_eq!(res.clips[&HashId(pending.id)], QUEUED);
            }
            _ => panic!("expected tracked progress"),
        }
    }

    #[tokio::test]
    async fn list_pages_newest_first() {
        let clips = Arc::new(MemoryClipStore::default());
        let state = test_state(clips.clone(), Arc::default(), 64);

        assert!(matches!(
            ClipService::list(&state, None, None).await.unwrap(),
            Page::Empty
        ));

        for title in ["a", "b", "c"] {
            clips.seed(1, title, false);
        }

        let Page::Clips(page) = ClipService::list(&state, Some(HashId(3)), Some(5))
            .await
            .unwrap()
        else {
            panic!("expected clips");
        };
        let titles: Vec<&str> = page.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a"]);
    }
}
