use async_trait::async_trait;

use crate::cursor::models::SyncCursor;
use waybill_common::error::WaybillResult;

#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Get or create the cursor row for a source stream.
    async fn get_or_create(&self, source: &str) -> WaybillResult<SyncCursor>;

    /// Fetch the cursor for a source, if one exists.
    async fn get(&self, source: &str) -> WaybillResult<Option<SyncCursor>>;

    /// Persist a new cursor value only if it is strictly greater than the
    /// stored one (or the stored one is unset). Returns `true` when the
    /// cursor actually advanced; a stale candidate leaves the row alone.
    async fn advance_if_newer(
        &self,
        source: &str,
        cursor_value: &str,
        metadata: Option<&serde_json::Value>,
    ) -> WaybillResult<bool>;

    /// Unconditionally set the cursor value (first-run initialization and
    /// force-full-resync). Creates the row if missing.
    async fn reset(&self, source: &str, cursor_value: &str) -> WaybillResult<SyncCursor>;
}
