use super::model::{Clip, ClipChanges, NewClip};
use crate::infrastructure::db::pool::DbPool;
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

const CLIP_COLUMNS: &str = "id, creator_id, processing, title, description, created_at";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An inserted row that is only visible to other readers once committed.
#[async_trait]
pub trait PendingInsert: Send {
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ClipStore: Send + Sync {
    /// Opens a transaction and inserts `draft` with `processing = true` inside it.
    async fn begin_insert(
        &self,
        draft: &NewClip,
        creator_id: i64,
    ) -> Result<(Clip, Box<dyn PendingInsert>), RepositoryError>;

    async fn find(&self, id: i64) -> Result<Option<Clip>, RepositoryError>;

    async fn find_many(&self, ids: &[i64]) -> Result<Vec<Clip>, RepositoryError>;

    async fn find_processing(&self) -> Result<Vec<Clip>, RepositoryError>;

    /// Newest first, strictly older than `before` when given.
    async fn list(&self, before: Option<i64>, limit: i64) -> Result<Vec<Clip>, RepositoryError>;

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<Clip>, RepositoryError>;

    async fn update(
        &self,
        id: i64,
        changes: &ClipChanges,
    ) -> Result<Option<Clip>, RepositoryError>;

    async fn set_processing(&self, id: i64, processing: bool) -> Result<(), RepositoryError>;

    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct ClipRepository {
    pool: DbPool,
}

impl ClipRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

struct PgPendingInsert {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PendingInsert for PgPendingInsert {
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ClipStore for ClipRepository {
    async fn begin_insert(
        &self,
        draft: &NewClip,
        creator_id: i64,
    ) -> Result<(Clip, Box<dyn PendingInsert>), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Dropping `tx` on error rolls the insert back.
        let clip = sqlx::query_as::<_, Clip>(&format!(
            r#"
            INSERT INTO clips (creator_id, processing, title, description)
            VALUES ($1, TRUE, $2, $3)
            RETURNING {CLIP_COLUMNS}
            "#
        ))
        .bind(creator_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .fetch_one(&mut *tx)
        .await?;

        Ok((clip, Box::new(PgPendingInsert { tx })))
    }

    async fn find(&self, id: i64) -> Result<Option<Clip>, RepositoryError> {
        let clip = sqlx::query_as::<_, Clip>(&format!(
            "SELECT {CLIP_COLUMNS} FROM clips WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(clip)
    }

    async fn find_many(&self, ids: &[i64]) -> Result<Vec<Clip>, RepositoryError> {
        let clips = sqlx::query_as::<_, Clip>(&format!(
            "SELECT {CLIP_COLUMNS} FROM clips WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(clips)
    }

    async fn find_processing(&self) -> Result<Vec<Clip>, RepositoryError> {
        let clips = sqlx::query_as::<_, Clip>(&format!(
            "SELECT {CLIP_COLUMNS} FROM clips WHERE processing ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(clips)
    }

    async fn list(&self, before: Option<i64>, limit: i64) -> Result<Vec<Clip>, RepositoryError> {
        let clips = sqlx::query_as::<_, Clip>(&format!(
            r#"
            SELECT {CLIP_COLUMNS} FROM clips
            WHERE ($1::BIGINT IS NULL OR id < $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(clips)
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<Clip>, RepositoryError> {
        let pattern = format!("%{query}%");
        let clips = sqlx::query_as::<_, Clip>(&format!(
            r#"
            SELECT {CLIP_COLUMNS} FROM clips
            WHERE (title || ' ' || description) ILIKE $1
            ORDER BY (title || ' ' || description) <-> $2
            LIMIT $3
            "#
        ))
        .bind(&pattern)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(clips)
    }

    async fn update(
        &self,
        id: i64,
        changes: &ClipChanges,
    ) -> Result<Option<Clip>, RepositoryError> {
        let clip = sqlx::query_as::<_, Clip>(&format!(
            r#"
            UPDATE clips
            SET
                title = COALESCE($1, title),
                description = COALESCE($2, description)
            WHERE id = $3
            RETURNING {CLIP_COLUMNS}
            "#
        ))
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(clip)
    }

    async fn set_processing(&self, id: i64, processing: bool) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE clips SET processing = $1 WHERE id = $2")
            .bind(processing)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM clips WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
