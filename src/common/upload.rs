use crate::infrastructure::storage::s3::StorageService;
use crate::infrastructure::storage::{BlobBody, StorageError};
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    written: u64,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(
        storage: &'a StorageService,
        key: String,
        content_type: &str,
    ) -> Result<Self, StorageError> {
        let upload_id = storage
            .create_multipart_upload(&key, content_type)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to initiate upload: {e}")))?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            written: 0,
        })
    }

    pub async fn write_part(&mut self, body: Bytes) -> Result<(), StorageError> {
        let len = body.len() as u64;
        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await
            .map_err(|e| {
                StorageError::Backend(format!("Failed to upload part {}: {e}", self.part_number))
            })?;

        self.parts.push(part);
        self.part_number += 1;
        self.written += len;

        Ok(())
    }

    pub async fn finish(self) -> Result<u64, StorageError> {
        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, self.parts)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to complete upload: {e}")))?;

        Ok(self.written)
    }

    pub async fn abort(&self) -> Result<(), StorageError> {
        self.storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to abort upload: {e}")))
    }
}

/// Reads until a full part is buffered or the body hits EOF.
async fn fill_part(body: &mut BlobBody<'_>) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(MIN_PART_SIZE);

    while buffer.len() < MIN_PART_SIZE {
        if body.read_buf(&mut buffer).await? == 0 {
            break;
        }
    }

    Ok(buffer)
}

/// Streams a body into S3. Bodies smaller than one part go through a single
/// `PutObject`, larger ones through a multipart upload that is aborted on error.
pub async fn stream_to_s3(
    storage: &StorageService,
    mut body: BlobBody<'_>,
    key: String,
    content_type: &str,
) -> Result<u64, StorageError> {
    let first = fill_part(&mut body).await?;

    if first.len() < MIN_PART_SIZE {
        let len = first.len() as u64;
        storage
            .put_object(&key, content_type, Bytes::from(first))
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to put {key}: {e}")))?;
        return Ok(len);
    }

    let mut uploader = MultipartUploader::new(storage, key, content_type).await?;
    let mut part = first;

    loop {
        let step = match uploader.write_part(Bytes::from(part)).await {
            Ok(()) => fill_part(&mut body).await.map_err(StorageError::from),
            Err(e) => Err(e),
        };

        match step {
            Ok(next) if next.is_empty() => break,
            Ok(next) => part = next,
            Err(e) => {
                if let Err(abort_err) = uploader.abort().await {
                    warn!(key = %uploader.key, error = %abort_err, "Failed to abort multipart upload");
                }
                return Err(e);
            }
        }
    }

    debug!(key = %uploader.key, parts = uploader.parts.len(), "Completing multipart upload");
    uploader.finish().await
}
