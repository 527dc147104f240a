use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::backfill::models::{BackfillJob, JobError, TaskOutcome};
use waybill_common::error::WaybillResult;
use waybill_common::types::SyncSource;

#[async_trait]
pub trait BackfillJobRepository: Send + Sync {
    /// Insert a new job in `pending` with zeroed counters.
    async fn create(&self, start_date: NaiveDate, end_date: NaiveDate)
        -> WaybillResult<BackfillJob>;

    async fn get(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>>;

    /// All jobs, newest first.
    async fn list(&self) -> WaybillResult<Vec<BackfillJob>>;

    /// Move a `pending` job to `in_progress`, stamping `started_at` once.
    /// Returns `None` if the job is missing or no longer pending.
    async fn mark_in_progress(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>>;

    /// Force a job to `failed`, appending the error. Used when task fan-out
    /// itself fails before any task runs.
    async fn mark_failed(&self, id: Uuid, error: &JobError) -> WaybillResult<Option<BackfillJob>>;

    /// Move a `pending`/`in_progress` job to `cancelled`. Returns `None` if
    /// the job is missing or already terminal.
    async fn cancel(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>>;

    /// Remove a job row. Returns `true` if a row was deleted.
    async fn delete(&self, id: Uuid) -> WaybillResult<bool>;

    /// Atomically apply one fetch task's terminal report: bump the source's
    /// counters, append any error, and — when this is the last outstanding
    /// task — transition the job to `completed` or `failed`. Returns `None`
    /// when the job is missing or already terminal (notably `cancelled`),
    /// in which case no counters move.
    async fn record_task_outcome(
        &self,
        id: Uuid,
        source: SyncSource,
        outcome: &TaskOutcome,
    ) -> WaybillResult<Option<BackfillJob>>;
}
