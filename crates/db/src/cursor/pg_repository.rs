use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::cursor::models::SyncCursor;
use crate::cursor::repositories::CursorRepository;
use waybill_common::error::{WaybillError, WaybillResult};

const CURSOR_COLS: &str =
    "id, source, cursor_value, last_synced_at, metadata, created_at, updated_at";

#[derive(Clone)]
pub struct PgCursorRepository {
    pool: PgPool,
}

impl PgCursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> WaybillResult<SyncCursor> {
        Ok(SyncCursor {
            id: row.get("id"),
            source: row.get("source"),
            cursor_value: row.get("cursor_value"),
            last_synced_at: row.get("last_synced_at"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl CursorRepository for PgCursorRepository {
    async fn get_or_create(&self, source: &str) -> WaybillResult<SyncCursor> {
        let row = sqlx::query(&format!(
            "insert into sync_cursors (id, source)
             values ($1, $2)
             on conflict (source) do update set updated_at = now()
             returning {CURSOR_COLS}",
        ))
        .bind(Uuid::new_v4())
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn get(&self, source: &str) -> WaybillResult<Option<SyncCursor>> {
        let row = sqlx::query(&format!(
            "select {CURSOR_COLS} from sync_cursors where source = $1",
        ))
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn advance_if_newer(
        &self,
        source: &str,
        cursor_value: &str,
        metadata: Option<&serde_json::Value>,
    ) -> WaybillResult<bool> {
        // Canonical cursor values compare chronologically as text, so the
        // monotonic guard lives in the where clause and is atomic.
        let result = sqlx::query(
            "update sync_cursors
             set cursor_value = $1,
                 last_synced_at = $2,
                 metadata = coalesce($3, metadata),
                 updated_at = $2
             where source = $4
               and (cursor_value is null or cursor_value < $1)",
        )
        .bind(cursor_value)
        .bind(Utc::now())
        .bind(metadata)
        .bind(source)
        .execute(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self, source: &str, cursor_value: &str) -> WaybillResult<SyncCursor> {
        let row = sqlx::query(&format!(
            "insert into sync_cursors (id, source, cursor_value)
             values ($1, $2, $3)
             on conflict (source) do update
               set cursor_value = excluded.cursor_value, updated_at = now()
             returning {CURSOR_COLS}",
        ))
        .bind(Uuid::new_v4())
        .bind(source)
        .bind(cursor_value)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    async fn test_repo() -> Option<PgCursorRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");

        sqlx::query(
            "create table if not exists sync_cursors (
               id uuid primary key default gen_random_uuid(),
               source text not null unique,
               cursor_value text,
               last_synced_at timestamptz,
               metadata jsonb,
               created_at timestamptz not null default now(),
               updated_at timestamptz not null default now()
             )",
        )
        .execute(&pool)
        .await
        .ok()?;

        Some(PgCursorRepository::new(pool))
    }

    fn unique_source() -> String {
        format!("shipping-{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn get_or_create_inserts_new() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        let cursor = repo.get_or_create(&source).await.expect("should work");
        assert_eq!(cursor.source, source);
        assert!(cursor.cursor_value.is_none());
        assert!(cursor.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn get_or_create_returns_existing() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        let first = repo.get_or_create(&source).await.expect("first");
        let second = repo.get_or_create(&source).await.expect("second");
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn advance_if_newer_moves_forward() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        repo.get_or_create(&source).await.expect("create");

        let advanced = repo
            .advance_if_newer(&source, "2026-01-02T00:00:00Z", None)
            .await
            .expect("advance");
        assert!(advanced);

        let cursor = repo.get(&source).await.expect("get").expect("exists");
        assert_eq!(cursor.cursor_value.as_deref(), Some("2026-01-02T00:00:00Z"));
        assert!(cursor.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn advance_if_newer_rejects_stale_value() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        repo.get_or_create(&source).await.expect("create");
        repo.advance_if_newer(&source, "2026-01-02T00:00:00Z", None)
            .await
            .expect("first advance");

        let advanced = repo
            .advance_if_newer(&source, "2026-01-01T00:00:00Z", None)
            .await
            .expect("stale advance");
        assert!(!advanced);

        let cursor = repo.get(&source).await.expect("get").expect("exists");
        assert_eq!(cursor.cursor_value.as_deref(), Some("2026-01-02T00:00:00Z"));
    }

    #[tokio::test]
    async fn advance_if_newer_rejects_equal_value() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        repo.get_or_create(&source).await.expect("create");
        repo.advance_if_newer(&source, "2026-01-02T00:00:00Z", None)
            .await
            .expect("first advance");

        let advanced = repo
            .advance_if_newer(&source, "2026-01-02T00:00:00Z", None)
            .await
            .expect("same advance");
        assert!(!advanced);
    }

    #[tokio::test]
    async fn reset_overrides_backwards() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        repo.get_or_create(&source).await.expect("create");
        repo.advance_if_newer(&source, "2026-06-01T00:00:00Z", None)
            .await
            .expect("advance");

        let cursor = repo
            .reset(&source, "2026-01-01T00:00:00Z")
            .await
            .expect("reset");
        assert_eq!(cursor.cursor_value.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn reset_creates_missing_row() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let source = unique_source();
        let cursor = repo
            .reset(&source, "2026-01-01T00:00:00Z")
            .await
            .expect("reset");
        assert_eq!(cursor.source, source);
        assert_eq!(cursor.cursor_value.as_deref(), Some("2026-01-01T00:00:00Z"));
    }
}
