//! Upload of a new clip as a two-participant saga.
//!
//! The clip row is inserted inside an open metadata transaction, then the raw
//! body is streamed to the blob store. [`UploadTransaction::commit`] only
//! commits the row; from then on the raw blob belongs to the transcoding
//! pipeline. [`UploadTransaction::rollback`] compensates by deleting the raw
//! blob and rolling the row back, and is a no-op once committed, so callers
//! run it on every exit path.
//!
//! A crash between the blob write and the commit leaves an unreferenced raw
//! blob behind. A committed row never points at a compensated blob.

use super::model::{Clip, NewClip};
use super::repository::{ClipStore, PendingInsert, RepositoryError};
use crate::infrastructure::storage::{BlobBody, BlobKey, BlobStore, StorageError};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("upload transaction was already rolled back")]
    RolledBack,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Committed,
    RolledBack,
}

pub struct UploadTransaction {
    clip: Clip,
    pending: Option<Box<dyn PendingInsert>>,
    blobs: Arc<dyn BlobStore>,
    max_bytes: u64,
    phase: Phase,
}

impl UploadTransaction {
    pub async fn begin(
        clips: &dyn ClipStore,
        blobs: Arc<dyn BlobStore>,
        draft: &NewClip,
        creator_id: i64,
        max_bytes: u64,
    ) -> Result<Self, UploadError> {
        let (clip, pending) = clips.begin_insert(draft, creator_id).await?;
        debug!(clip_id = clip.id, creator_id, "Opened upload transaction");

        Ok(Self {
            clip,
            pending: Some(pending),
            blobs,
            max_bytes,
            phase: Phase::Open,
        })
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }

    /// Streams `body` to `(id, "raw")`. At most `max_bytes + 1` bytes are read;
    /// seeing that extra byte means the source had more data than allowed.
    pub async fn upload_raw(&mut self, body: BlobBody<'_>) -> Result<u64, UploadError> {
        if self.phase != Phase::Open {
            return Err(UploadError::RolledBack);
        }

        let limited: BlobBody<'_> = Box::pin(body.take(self.max_bytes.saturating_add(1)));
        let written = self.blobs.put(&BlobKey::raw(self.clip.id), limited).await?;

        if written > self.max_bytes {
            return Err(UploadError::TooLarge {
                limit: self.max_bytes,
            });
        }

        Ok(written)
    }

    /// Commits the row. The raw blob is left untouched.
    pub async fn commit(&mut self) -> Result<(), UploadError> {
        match self.phase {
            Phase::Committed => return Ok(()),
            Phase::RolledBack => return Err(UploadError::RolledBack),
            Phase::Open => {}
        }

        let pending = self.pending.take().ok_or(UploadError::RolledBack)?;
        pending.commit().await?;
        self.phase = Phase::Committed;

        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), UploadError> {
        if self.phase != Phase::Open {
            return Ok(());
        }

        let compensation = self.blobs.delete(&BlobKey::raw(self.clip.id)).await;
        if let Err(e) = &compensation {
            warn!(clip_id = self.clip.id, error = %e, "Failed to delete raw upload during rollback");
        }

        if let Some(pending) = self.pending.take() {
            pending.rollback().await?;
        }

        compensation?;
        self.phase = Phase::RolledBack;
        debug!(clip_id = self.clip.id, "Rolled back upload transaction");

        Ok(())
    }
}
