use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::backfill::models::{BackfillJob, JobError, JobStatus, TaskOutcome};
use crate::backfill::repositories::BackfillJobRepository;
use waybill_common::error::{WaybillError, WaybillResult};
use waybill_common::types::SyncSource;

const JOB_COLS: &str = "id, start_date, end_date, status, \
     orders_total, orders_imported, orders_failed, \
     shipping_total, shipping_imported, shipping_failed, \
     tasks_total, tasks_completed, tasks_failed, \
     error_log, created_at, updated_at, started_at, completed_at";

#[derive(Clone)]
pub struct PgBackfillJobRepository {
    pool: PgPool,
}

impl PgBackfillJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> WaybillResult<BackfillJob> {
        let status_raw: String = row.get("status");
        let status = JobStatus::from_str(&status_raw).map_err(WaybillError::Internal)?;

        let error_log: serde_json::Value = row.get("error_log");
        let error_log: Vec<JobError> = serde_json::from_value(error_log)
            .map_err(|e| WaybillError::Internal(format!("bad error_log: {e}")))?;

        Ok(BackfillJob {
            id: row.get("id"),
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
            status,
            orders_total: row.get("orders_total"),
            orders_imported: row.get("orders_imported"),
            orders_failed: row.get("orders_failed"),
            shipping_total: row.get("shipping_total"),
            shipping_imported: row.get("shipping_imported"),
            shipping_failed: row.get("shipping_failed"),
            tasks_total: row.get("tasks_total"),
            tasks_completed: row.get("tasks_completed"),
            tasks_failed: row.get("tasks_failed"),
            error_log,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl BackfillJobRepository for PgBackfillJobRepository {
    async fn create(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> WaybillResult<BackfillJob> {
        let row = sqlx::query(&format!(
            "insert into backfill_jobs (id, start_date, end_date)
             values ($1, $2, $3)
             returning {JOB_COLS}",
        ))
        .bind(Uuid::new_v4())
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn get(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>> {
        let row = sqlx::query(&format!(
            "select {JOB_COLS} from backfill_jobs where id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> WaybillResult<Vec<BackfillJob>> {
        let rows = sqlx::query(&format!(
            "select {JOB_COLS} from backfill_jobs order by created_at desc",
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn mark_in_progress(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>> {
        let row = sqlx::query(&format!(
            "update backfill_jobs
             set status = 'in_progress',
                 started_at = coalesce(started_at, now()),
                 updated_at = now()
             where id = $1 and status = 'pending'
             returning {JOB_COLS}",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn mark_failed(&self, id: Uuid, error: &JobError) -> WaybillResult<Option<BackfillJob>> {
        let entry = serde_json::to_value(vec![error])
            .map_err(|e| WaybillError::Internal(e.to_string()))?;

        let row = sqlx::query(&format!(
            "update backfill_jobs
             set status = 'failed',
                 error_log = error_log || $2::jsonb,
                 completed_at = coalesce(completed_at, now()),
                 updated_at = now()
             where id = $1 and status in ('pending', 'in_progress')
             returning {JOB_COLS}",
        ))
        .bind(id)
        .bind(entry)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn cancel(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>> {
        let row = sqlx::query(&format!(
            "update backfill_jobs
             set status = 'cancelled',
                 completed_at = now(),
                 updated_at = now()
             where id = $1 and status in ('pending', 'in_progress')
             returning {JOB_COLS}",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> WaybillResult<bool> {
        let result = sqlx::query("delete from backfill_jobs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WaybillError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_task_outcome(
        &self,
        id: Uuid,
        source: SyncSource,
        outcome: &TaskOutcome,
    ) -> WaybillResult<Option<BackfillJob>> {
        let (completed_inc, failed_inc) = if outcome.error.is_none() {
            (1i32, 0i32)
        } else {
            (0i32, 1i32)
        };

        let errors: Vec<JobError> = outcome
            .error
            .as_deref()
            .map(|msg| vec![JobError::new(source, msg)])
            .unwrap_or_default();
        let error_entries = serde_json::to_value(errors)
            .map_err(|e| WaybillError::Internal(e.to_string()))?;

        // One statement so the counter bump and the terminal transition
        // cannot be split by a concurrent writer. The status guard also
        // keeps cancelled jobs frozen: their counters never move again.
        let sql = match source {
            SyncSource::Orders => format!(
                "update backfill_jobs
                 set orders_total = orders_total + $2,
                     orders_imported = orders_imported + $3,
                     orders_failed = orders_failed + $4,
                     tasks_completed = tasks_completed + $5,
                     tasks_failed = tasks_failed + $6,
                     error_log = error_log || $7::jsonb,
                     status = case
                       when tasks_completed + tasks_failed + 1 >= tasks_total then
                         case when tasks_failed + $6 > 0 then 'failed' else 'completed' end
                       else status
                     end,
                     completed_at = case
                       when tasks_completed + tasks_failed + 1 >= tasks_total then now()
                       else completed_at
                     end,
                     updated_at = now()
                 where id = $1 and status in ('pending', 'in_progress')
                 returning {JOB_COLS}",
            ),
            SyncSource::Shipping => format!(
                "update backfill_jobs
                 set shipping_total = shipping_total + $2,
                     shipping_imported = shipping_imported + $3,
                     shipping_failed = shipping_failed + $4,
                     tasks_completed = tasks_completed + $5,
                     tasks_failed = tasks_failed + $6,
                     error_log = error_log || $7::jsonb,
                     status = case
                       when tasks_completed + tasks_failed + 1 >= tasks_total then
                         case when tasks_failed + $6 > 0 then 'failed' else 'completed' end
                       else status
                     end,
                     completed_at = case
                       when tasks_completed + tasks_failed + 1 >= tasks_total then now()
                       else completed_at
                     end,
                     updated_at = now()
                 where id = $1 and status in ('pending', 'in_progress')
                 returning {JOB_COLS}",
            ),
        };

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(outcome.total)
            .bind(outcome.imported)
            .bind(outcome.failed)
            .bind(completed_inc)
            .bind(failed_inc)
            .bind(error_entries)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }
}
