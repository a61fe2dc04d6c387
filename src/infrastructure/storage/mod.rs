use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub mod s3;

/// Name of the untouched upload inside a clip's object prefix.
pub const RAW: &str = "raw";
pub const THUMBNAIL: &str = "thumbnail.jpg";
pub const MANIFEST: &str = "dash.mpd";

pub type BlobBody<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// Address of one object: every clip owns the `"{clip_id}/"` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub clip_id: i64,
    pub name: String,
}

impl BlobKey {
    pub fn new(clip_id: i64, name: impl Into<String>) -> Self {
        Self {
            clip_id,
            name: name.into(),
        }
    }

    pub fn raw(clip_id: i64) -> Self {
        Self::new(clip_id, RAW)
    }

    pub fn object_key(&self) -> String {
        format!("{}/{}", self.clip_id, self.name)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.clip_id, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(BlobKey),
    #[error("failed to read upload body: {0}")]
    Body(#[from] std::io::Error),
    #[error("blob store request failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams `body` to `key` until EOF and returns the number of bytes stored.
    async fn put(&self, key: &BlobKey, body: BlobBody<'_>) -> Result<u64, StorageError>;

    async fn get(&self, key: &BlobKey) -> Result<BlobBody<'static>, StorageError>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError>;
}
