use super::{BlobBody, BlobKey, BlobStore, StorageError};
use crate::common::upload::stream_to_s3;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use tracing::info;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub async fn new(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Connected to S3 (MinIO)");

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        body: bytes::Bytes,
    ) -> Result<(), aws_sdk_s3::Error> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await?;

        Ok(())
    }

    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Backend(aws_sdk_s3::Error::from(e).to_string()))?;

        result
            .upload_id
            .ok_or_else(|| StorageError::Backend("S3 returned no upload id".to_string()))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: bytes::Bytes,
    ) -> Result<aws_sdk_s3::types::CompletedPart, aws_sdk_s3::Error> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await?;

        Ok(aws_sdk_s3::types::CompletedPart::builder()
            .set_e_tag(result.e_tag)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<aws_sdk_s3::types::CompletedPart>,
    ) -> Result<(), aws_sdk_s3::Error> {
        let completed_multipart_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await?;

        Ok(())
    }

    pub async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), aws_sdk_s3::Error> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for StorageService {
    async fn put(&self, key: &BlobKey, body: BlobBody<'_>) -> Result<u64, StorageError> {
        let content_type = mime_guess::from_path(&key.name).first_or_octet_stream();
        stream_to_s3(self, body, key.object_key(), content_type.essence_str()).await
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobBody<'static>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.object_key())
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from);

        match result {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(aws_sdk_s3::Error::NoSuchKey(_)) => Err(StorageError::NotFound(key.clone())),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.object_key())
            .send()
            .await
            .map_err(|e| StorageError::Backend(aws_sdk_s3::Error::from(e).to_string()))?;

        Ok(())
    }
}
