//! Document metadata store.
//!
//! Uses PostgreSQL with sqlx. Only the retention sweep touches it; the
//! job store lives in Redis.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;
use crate::error::{MdusError, Result};
use crate::jobs::DocumentId;

/// A document whose retention date has passed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RetentionCandidate {
    pub id: DocumentId,
    pub file_path: String,
    pub retention_date: NaiveDate,
}

/// Metadata operations used by retention enforcement.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Up to `limit` unarchived documents past their retention date, oldest first.
    async fn list_retention_expired(&self, limit: i64) -> Result<Vec<RetentionCandidate>>;

    /// Record that a document's file now lives at `archive_path`.
    async fn mark_archived(&self, id: DocumentId, archive_path: &str) -> Result<()>;
}

/// [`DocumentRepository`] over the `documents` table.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    /// Connect using `config`; `None` when no database URL is configured.
    pub async fn connect(config: &DatabaseConfig) -> Result<Option<Self>> {
        let Some(url) = config.url.as_deref() else {
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await?;

        Ok(Some(Self { pool }))
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn list_retention_expired(&self, limit: i64) -> Result<Vec<RetentionCandidate>> {
        let rows = sqlx::query_as::<_, RetentionCandidate>(
            r#"
            SELECT id, file_path, retention_date
            FROM documents
            WHERE retention_date IS NOT NULL
              AND retention_date < CURRENT_DATE
              AND status != 'archived'
            ORDER BY retention_date ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_archived(&self, id: DocumentId, archive_path: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'archived', file_path = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(archive_path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MdusError::new(
                crate::error::ErrorCode::DatabaseError,
                format!("Document not found: {}", id),
            ));
        }
        Ok(())
    }
}
