use crate::config::env::{self, EnvKey};
use crate::workers::scheduler::{QueuePolicy, SchedulerConfig};
use serde::Deserialize;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub blob_proxy_port: u16,
    pub database_url: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub jwt_secret: String,
    pub max_upload_size_bytes: u64,
    pub transcoder_workers: usize,
    pub transcoder_backlog: usize,
    pub transcoder_queue_policy: QueuePolicy,
    pub progress_shards: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            blob_proxy_port: env::get_parsed(EnvKey::BlobProxyPort, 12786),
            database_url: env::get(EnvKey::DatabaseUrl)?,
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            jwt_secret: env::get(EnvKey::JwtSecret)?,
            max_upload_size_bytes: env::get_parsed(
                EnvKey::MaxUploadSizeBytes,
                DEFAULT_MAX_UPLOAD_BYTES,
            ),
            transcoder_workers: env::get_parsed(EnvKey::TranscoderWorkers, 2).max(1),
            transcoder_backlog: env::get_parsed(EnvKey::TranscoderBacklog, 1000).max(1),
            transcoder_queue_policy: env::get_parsed(
                EnvKey::TranscoderQueuePolicy,
                QueuePolicy::Block,
            ),
            progress_shards: env::get_parsed(EnvKey::ProgressShards, 10).max(1),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.transcoder_workers,
            backlog: self.transcoder_backlog,
            policy: self.transcoder_queue_policy,
        }
    }

    /// Base URL of the local blob proxy, as seen by the media tools.
    pub fn blob_proxy_url(&self) -> String {
        format!("http://127.0.0.1:{}/s3/", self.blob_proxy_port)
    }
}
