use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Clip {
    pub id: i64,
    pub creator_id: i64,
    /// True from insert until the packaged output is in place.
    pub processing: bool,
    pub title: String,
    pub description: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewClip {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipChanges {
    pub title: Option<String>,
    pub description: Option<String>,
}
