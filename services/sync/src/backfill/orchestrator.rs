use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::backfill::task::FetchTask;
use crate::notify::{UpdateBroadcaster, UpdateEvent};
use crate::queue::{TaskQueue, FETCH_QUEUE};
use waybill_common::error::{WaybillError, WaybillResult};
use waybill_common::types::SyncSource;
use waybill_db::backfill::models::{BackfillJob, JobError};
use waybill_db::backfill::repositories::BackfillJobRepository;

/// Owns the backfill job lifecycle: creates jobs, fans their fetch tasks
/// out onto the durable queue, and services the control-surface verbs.
/// Task execution lives in the worker.
pub struct BackfillOrchestrator {
    jobs: Arc<dyn BackfillJobRepository>,
    queue: Arc<dyn TaskQueue>,
    updates: UpdateBroadcaster,
}

impl BackfillOrchestrator {
    pub fn new(
        jobs: Arc<dyn BackfillJobRepository>,
        queue: Arc<dyn TaskQueue>,
        updates: UpdateBroadcaster,
    ) -> Self {
        Self {
            jobs,
            queue,
            updates,
        }
    }

    /// Creates a pending job and enqueues one fetch task per source. If
    /// fan-out fails the job is marked failed before the error surfaces.
    pub async fn create_job(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> WaybillResult<BackfillJob> {
        if start_date > end_date {
            return Err(WaybillError::Validation(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }

        let job = self.jobs.create(start_date, end_date).await?;
        info!(job_id = %job.id, %start_date, %end_date, "created backfill job");

        for source in [SyncSource::Orders, SyncSource::Shipping] {
            let task = FetchTask {
                job_id: job.id,
                source,
                start_date,
                end_date,
            };
            let payload = serde_json::to_value(&task)
                .map_err(|e| WaybillError::Internal(format!("task encoding failed: {e}")))?;
            if let Err(e) = self.queue.enqueue(FETCH_QUEUE, &payload).await {
                error!(job_id = %job.id, source = %source, error = %e, "fetch task fan-out failed");
                let job_error =
                    JobError::new(source, format!("failed to enqueue fetch task: {e}"));
                if let Some(failed) = self.jobs.mark_failed(job.id, &job_error).await? {
                    self.announce(&failed);
                }
                return Err(e);
            }
        }

        self.announce(&job);
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> WaybillResult<BackfillJob> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| WaybillError::NotFound(format!("backfill job {id} not found")))
    }

    pub async fn list_jobs(&self) -> WaybillResult<Vec<BackfillJob>> {
        self.jobs.list().await
    }

    /// Cancels a pending or in-progress job. Running tasks notice the
    /// cancellation at their next page boundary; their late reports are
    /// discarded by the status guard on the job row.
    pub async fn cancel_job(&self, id: Uuid) -> WaybillResult<BackfillJob> {
        match self.jobs.cancel(id).await? {
            Some(job) => {
                info!(job_id = %id, "cancelled backfill job");
                self.announce(&job);
                Ok(job)
            }
            None => {
                let job = self.get_job(id).await?;
                Err(WaybillError::Validation(format!(
                    "job {id} is already {}",
                    job.status.as_str()
                )))
            }
        }
    }

    /// Restart is a fresh job over the same range; the original row and
    /// its counters stay as history.
    pub async fn restart_job(&self, id: Uuid) -> WaybillResult<BackfillJob> {
        let original = self.get_job(id).await?;
        info!(job_id = %id, "restarting backfill job as a new job");
        self.create_job(original.start_date, original.end_date).await
    }

    /// Deletes a terminal job row. Active jobs must be cancelled first so
    /// no in-flight task reports against a missing row.
    pub async fn delete_job(&self, id: Uuid) -> WaybillResult<()> {
        let job = self.get_job(id).await?;
        if !job.status.is_terminal() {
            return Err(WaybillError::Validation(format!(
                "job {id} is {}, cancel it before deleting",
                job.status.as_str()
            )));
        }
        self.jobs.delete(id).await?;
        info!(job_id = %id, "deleted backfill job");
        Ok(())
    }

    fn announce(&self, job: &BackfillJob) {
        self.updates.broadcast(UpdateEvent::JobUpdated {
            job_id: job.id,
            status: job.status.as_str().to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryJobRepo, InMemoryQueue};
    use waybill_db::backfill::models::JobStatus;

    fn orchestrator() -> (BackfillOrchestrator, InMemoryJobRepo, InMemoryQueue) {
        let jobs = InMemoryJobRepo::default();
        let queue = InMemoryQueue::default();
        let orchestrator = BackfillOrchestrator::new(
            Arc::new(jobs.clone()),
            Arc::new(queue.clone()),
            UpdateBroadcaster::new(8),
        );
        (orchestrator, jobs, queue)
    }

    fn dates() -> (NaiveDate, NaiveDate) {
        (
            "2026-01-01".parse().unwrap(),
            "2026-01-31".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn create_job_fans_out_one_task_per_source() {
        let (orchestrator, _, queue) = orchestrator();
        let (start, end) = dates();

        let job = orchestrator.create_job(start, end).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let payloads = queue.payloads(FETCH_QUEUE);
        assert_eq!(payloads.len(), 2);
        let sources: Vec<_> = payloads.iter().map(|p| p["source"].clone()).collect();
        assert!(sources.contains(&serde_json::json!("orders")));
        assert!(sources.contains(&serde_json::json!("shipping")));
        for payload in &payloads {
            assert_eq!(payload["jobId"], job.id.to_string());
            assert_eq!(payload["startDate"], "2026-01-01");
        }
    }

    #[tokio::test]
    async fn inverted_range_is_rejected_before_any_writes() {
        let (orchestrator, jobs, queue) = orchestrator();
        let (start, end) = dates();

        let err = orchestrator.create_job(end, start).await.unwrap_err();
        assert!(matches!(err, WaybillError::Validation(_)));
        assert!(jobs.list().await.unwrap().is_empty());
        assert_eq!(queue.len(FETCH_QUEUE), 0);
    }

    #[tokio::test]
    async fn fanout_failure_marks_job_failed() {
        let (orchestrator, jobs, queue) = orchestrator();
        queue.fail_enqueue_on(FETCH_QUEUE);
        let (start, end) = dates();

        let err = orchestrator.create_job(start, end).await.unwrap_err();
        assert!(matches!(err, WaybillError::Queue(_)));

        let stored = &jobs.list().await.unwrap()[0];
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_log.len(), 1);
        assert!(stored.error_log[0].error.contains("enqueue"));
    }

    #[tokio::test]
    async fn cancel_pending_job() {
        let (orchestrator, _, _) = orchestrator();
        let (start, end) = dates();
        let job = orchestrator.create_job(start, end).await.unwrap();

        let cancelled = orchestrator.cancel_job(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_terminal_job_is_rejected() {
        let (orchestrator, _, _) = orchestrator();
        let (start, end) = dates();
        let job = orchestrator.create_job(start, end).await.unwrap();
        orchestrator.cancel_job(job.id).await.unwrap();

        let err = orchestrator.cancel_job(job.id).await.unwrap_err();
        assert!(matches!(err, WaybillError::Validation(_)));
    }

    #[tokio::test]
    async fn restart_creates_a_fresh_job_over_the_same_range() {
        let (orchestrator, _, queue) = orchestrator();
        let (start, end) = dates();
        let original = orchestrator.create_job(start, end).await.unwrap();
        orchestrator.cancel_job(original.id).await.unwrap();

        let replay = orchestrator.restart_job(original.id).await.unwrap();
        assert_ne!(replay.id, original.id);
        assert_eq!(replay.start_date, start);
        assert_eq!(replay.end_date, end);
        assert_eq!(replay.status, JobStatus::Pending);
        // two tasks from the original, two from the replay
        assert_eq!(queue.len(FETCH_QUEUE), 4);
    }

    #[tokio::test]
    async fn delete_refuses_active_jobs() {
        let (orchestrator, jobs, _) = orchestrator();
        let (start, end) = dates();
        let job = orchestrator.create_job(start, end).await.unwrap();

        let err = orchestrator.delete_job(job.id).await.unwrap_err();
        assert!(matches!(err, WaybillError::Validation(_)));

        orchestrator.cancel_job(job.id).await.unwrap();
        orchestrator.delete_job(job.id).await.unwrap();
        assert!(jobs.get(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let (orchestrator, _, _) = orchestrator();
        let err = orchestrator.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WaybillError::NotFound(_)));
    }
}
