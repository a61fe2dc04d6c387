use super::model::{Clip, ClipChanges, NewClip};
use crate::common::hash_id::HashId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const SEARCH_LIMIT: i64 = 10;

/// The `json` part of an upload.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateClipRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters"))]
    pub title: String,
    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    #[serde(default)]
    pub description: String,
}

impl From<CreateClipRequest> for NewClip {
    fn from(req: CreateClipRequest) -> Self {
        Self {
            title: req.title.trim().to_string(),
            description: req.description,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateClipRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,
}

impl From<UpdateClipRequest> for ClipChanges {
    fn from(req: UpdateClipRequest) -> Self {
        Self {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClipResponse {
    #[schema(value_type = String, example = "AAAAAAAAAAE")]
    pub id: HashId,
    #[schema(value_type = String)]
    pub creator_id: HashId,
    pub title: String,
    pub description: String,
    pub processing: bool,
    /// RFC 3339.
    pub created_at: String,
}

impl From<Clip> for ClipResponse {
    fn from(clip: Clip) -> Self {
        Self {
            id: HashId(clip.id),
            creator_id: HashId(clip.creator_id),
            title: clip.title,
            description: clip.description,
            processing: clip.processing,
            created_at: clip.created_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

/// `-1` means queued, otherwise percent complete.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressResponse {
    #[schema(value_type = HashMap<String, i32>)]
    pub clips: HashMap<HashId, i32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Only clips older than this one.
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProgressQuery {
    /// Comma separated clip ids.
    pub ids: String,
}
