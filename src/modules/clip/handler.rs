use super::dto::*;
use super::service::{ClipError, ClipService, Page, Progress};
use crate::common::hash_id::HashId;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::infrastructure::storage::BlobBody;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;
use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::info;

fn page_response(page: Page, message: &str) -> Response {
    match page {
        Page::Empty => StatusCode::NO_CONTENT.into_response(),
        Page::Clips(clips) => {
            ApiSuccess(ApiResponse::success(clips, message), StatusCode::OK).into_response()
        }
    }
}

fn parse_id(raw: &str) -> Result<HashId, ApiError> {
    raw.trim()
        .parse::<HashId>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Upload Clip
/// Multipart body: a `json` part with the metadata followed by a `video` part
/// that is streamed straight into object storage.
#[utoipa::path(
    post,
    path = "/api/v1/clips",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Clip uploaded and queued", body = ApiResponse<ClipResponse>),
        (status = 400, description = "Bad Request"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Video too large"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Clips",
    security(("bearer_auth" = []))
)]
pub async fn upload_clip(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let json = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
        .ok_or_else(|| ApiError::bad_request("No json part"))?;

    if json.name() != Some("json") {
        return Err(ApiError::bad_request("First part must be json"));
    }

    let metadata = json
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;
    let req: CreateClipRequest = serde_json::from_slice(&metadata)
        .map_err(|e| ApiError::bad_request(format!("Invalid clip metadata: {e}")))?;

    let video = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
        .ok_or_else(|| ApiError::bad_request("No video part"))?;

    if video.name() != Some("video") {
        return Err(ApiError::bad_request("Second part must be video"));
    }

    info!(user_id = user.id, file = ?video.file_name(), "Receiving clip upload");

    let body: BlobBody<'_> = Box::pin(StreamReader::new(video.map_err(std::io::Error::other)));
    let clip = ClipService::upload(&state, user.id, req, body).await?;

    Ok(ApiSuccess(
        ApiResponse::success(clip, "Clip uploaded successfully"),
        StatusCode::CREATED,
    )
    .into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/clips/{id}",
    params(
        ("id" = String, Path, description = "Clip ID")
    ),
    responses(
        (status = 200, description = "Get Clip", body = ApiResponse<ClipResponse>),
        (status = 400, description = "Malformed ID"),
        (status = 404, description = "Clip Not Found"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Clips"
)]
pub async fn get_clip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let clip = ClipService::get(&state, parse_id(&id)?).await?;
    Ok(ApiSuccess(ApiResponse::success(clip, "Clip retrieved successfully"), StatusCode::OK)
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/clips",
    params(ListQuery),
    responses(
        (status = 200, description = "Newest clips first", body = ApiResponse<Vec<ClipResponse>>),
        (status = 204, description = "No clips"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Clips"
)]
pub async fn list_clips(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let before = query.before.as_deref().map(parse_id).transpose()?;
    let page = ClipService::list(&state, before, query.limit).await?;
    Ok(page_response(page, "Clips retrieved successfully"))
}

#[utoipa::path(
    get,
    path = "/api/v1/clips/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Closest matches", body = ApiResponse<Vec<ClipResponse>>),
        (status = 204, description = "No matches"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Clips"
)]
pub async fn search_clips(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let page = ClipService::search(&state, &query.query).await?;
    Ok(page_response(page, "Search results"))
}

/// Clip Progress
/// `-1` while a clip waits for a worker, otherwise percent complete.
#[utoipa::path(
    get,
    path = "/api/v1/clips/progress",
    params(ProgressQuery),
    responses(
        (status = 200, description = "Progress of clips being processed", body = ApiResponse<ProgressResponse>),
        (status = 204, description = "None of the clips is being processed"),
        (status = 400, description = "Malformed ID"),
        (status = 404, description = "None of the clips exists")
    ),
    tag = "Clips"
)]
pub async fn get_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Response, ApiError> {
    let ids = query
        .ids
        .split(',')
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_id)
        .collect::<Result<Vec<_>, _>>()?;

    match ClipService::progress(&state, &ids).await? {
        Progress::Unknown => Err(ClipError::NotFound.into()),
        Progress::Idle => Ok(StatusCode::NO_CONTENT.into_response()),
        Progress::Tracked(res) => Ok(ApiSuccess(
            ApiResponse::success(res, "Progress retrieved successfully"),
            StatusCode::OK,
        )
        .into_response()),
    }
}

#[utoipa::path(
    patch,
    path = "/api/v1/clips/{id}",
    params(
        ("id" = String, Path, description = "Clip ID")
    ),
    request_body = UpdateClipRequest,
    responses(
        (status = 200, description = "Clip Updated", body = ApiResponse<ClipResponse>),
        (status = 400, description = "Bad Request"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Clip Not Found")
    ),
    tag = "Clips",
    security(("bearer_auth" = []))
)]
pub async fn update_clip(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateClipRequest>,
) -> Result<Response, ApiError> {
    let clip = ClipService::update(&state, parse_id(&id)?, user.id, req).await?;
    Ok(ApiSuccess(ApiResponse::success(clip, "Clip updated successfully"), StatusCode::OK)
        .into_response())
}

#[utoipa::path(
    delete,
    path = "/api/v1/clips/{id}",
    params(
        ("id" = String, Path, description = "Clip ID")
    ),
    responses(
        (status = 204, description = "Clip Deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Clip Not Found")
    ),
    tag = "Clips",
    security(("bearer_auth" = []))
)]
pub async fn delete_clip(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    ClipService::delete(&state, parse_id(&id)?, user.id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
