use crate::infrastructure::storage::{BlobBody, BlobKey, StorageError};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error};

fn blob_key(id: i64, name: String) -> Result<BlobKey, StatusCode> {
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(BlobKey::new(id, name))
}

fn storage_failure(key: &BlobKey, e: StorageError) -> Response {
    match e {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        e => {
            error!(%key, error = %e, "Blob proxy storage error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Streams a stored object out, e.g. the raw upload into ffmpeg.
pub async fn get_blob(
    State(state): State<AppState>,
    Path((id, name)): Path<(i64, String)>,
) -> Response {
    let key = match blob_key(id, name) {
        Ok(key) => key,
        Err(status) => return status.into_response(),
    };

    let reader = match state.blobs.get(&key).await {
        Ok(reader) => reader,
        Err(e) => return storage_failure(&key, e),
    };

    let content_type = mime_guess::from_path(&key.name).first_or_octet_stream();
    debug!(%key, "Serving blob");

    (
        [(header::CONTENT_TYPE, content_type.to_string())],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

/// Stores the request body, e.g. a thumbnail or DASH segment written by ffmpeg.
pub async fn put_blob(
    State(state): State<AppState>,
    Path((id, name)): Path<(i64, String)>,
    body: Body,
) -> Response {
    let key = match blob_key(id, name) {
        Ok(key) => key,
        Err(status) => return status.into_response(),
    };

    let reader: BlobBody<'_> = Box::pin(StreamReader::new(
        body.into_data_stream().map_err(std::io::Error::other),
    ));

    match state.blobs.put(&key, reader).await {
        Ok(written) => {
            debug!(%key, bytes = written, "Stored blob");
            StatusCode::CREATED.into_response()
        }
        Err(e) => storage_failure(&key, e),
    }
}
