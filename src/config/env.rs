use std::env;
use std::str::FromStr;
use tracing::warn;

pub enum EnvKey {
    ServerPort,
    BlobProxyPort,
    DatabaseUrl,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    JwtSecret,
    MaxUploadSizeBytes,
    TranscoderWorkers,
    TranscoderBacklog,
    TranscoderQueuePolicy,
    ProgressShards,
    FfmpegPath,
    FfprobePath,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::BlobProxyPort => "BLOB_PROXY_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_CLIPS",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::JwtSecret => "JWT_SECRET",
            EnvKey::MaxUploadSizeBytes => "MAX_UPLOAD_SIZE_BYTES",
            EnvKey::TranscoderWorkers => "TRANSCODER_WORKERS",
            EnvKey::TranscoderBacklog => "TRANSCODER_BACKLOG",
            EnvKey::TranscoderQueuePolicy => "TRANSCODER_QUEUE_POLICY",
            EnvKey::ProgressShards => "PROGRESS_SHARDS",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Parses `key`, falling back to `default` when it is unset or unparsable.
/// An unparsable value is logged so a typo does not pass silently.
pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    let name = key.as_str();
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or_else(|_| {
            warn!(key = name, value = %val, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::scheduler::QueuePolicy;

    #[test]
    fn unparsable_values_fall_back_to_the_default() {
        // Only this test touches these variables.
        unsafe {
            env::set_var(EnvKey::TranscoderQueuePolicy.as_str(), "rejct");
            env::set_var(EnvKey::ProgressShards.as_str(), "ten");
        }

        assert_eq!(
            get_parsed(EnvKey::TranscoderQueuePolicy, QueuePolicy::Block),
            QueuePolicy::Block
        );
        assert_eq!(get_parsed(EnvKey::ProgressShards, 10usize), 10);

        unsafe {
            env::set_var(EnvKey::TranscoderQueuePolicy.as_str(), "reject");
            env::set_var(EnvKey::ProgressShards.as_str(), "16");
        }

        assert_eq!(
            get_parsed(EnvKey::TranscoderQueuePolicy, QueuePolicy::Block),
            QueuePolicy::Reject
        );
        assert_eq!(get_parsed(EnvKey::ProgressShards, 10usize), 16);
    }
}
