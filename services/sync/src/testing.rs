//! In-memory doubles for the storage and queue traits, shared by the
//! unit tests of the poller, the backfill pipeline, and the HTTP layer.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::queue::{QueuedMessage, TaskQueue};
use waybill_common::error::{WaybillError, WaybillResult};
use waybill_common::types::SyncSource;
use waybill_db::backfill::models::{BackfillJob, JobError, JobStatus, TaskOutcome};
use waybill_db::backfill::repositories::BackfillJobRepository;
use waybill_db::cursor::models::SyncCursor;
use waybill_db::cursor::repositories::CursorRepository;
use waybill_db::shipment::models::Shipment;
use waybill_db::shipment::repositories::ShipmentRepository;

#[derive(Clone, Default)]
pub struct InMemoryShipmentRepo {
    rows: Arc<Mutex<HashMap<String, Shipment>>>,
    fail_ids: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryShipmentRepo {
    pub fn fail_for(&self, external_id: &str) {
        self.fail_ids.lock().unwrap().insert(external_id.to_owned());
    }

    pub fn get(&self, external_id: &str) -> Option<Shipment> {
        self.rows.lock().unwrap().get(external_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryShipmentRepo {
    async fn upsert_by_external_id(&self, shipment: Shipment) -> WaybillResult<Shipment> {
        if self.fail_ids.lock().unwrap().contains(&shipment.external_id) {
            return Err(WaybillError::Database(format!(
                "injected failure for {}",
                shipment.external_id
            )));
        }
        let mut rows = self.rows.lock().unwrap();
        let stored = match rows.get(&shipment.external_id) {
            Some(existing) => Shipment {
                id: existing.id,
                created_at: existing.created_at,
                ..shipment
            },
            None => shipment,
        };
        rows.insert(stored.external_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_by_external_id(&self, external_id: &str) -> WaybillResult<Option<Shipment>> {
        Ok(self.get(external_id))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCursorRepo {
    rows: Arc<Mutex<HashMap<String, SyncCursor>>>,
}

fn blank_cursor(source: &str) -> SyncCursor {
    let now = Utc::now();
    SyncCursor {
        id: Uuid::new_v4(),
        source: source.to_owned(),
        cursor_value: None,
        last_synced_at: None,
        metadata: None,
        created_at: now,
        updated_at: now,
    }
}

impl InMemoryCursorRepo {
    pub fn value(&self, source: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .get(source)
            .and_then(|c| c.cursor_value.clone())
    }
}

#[async_trait]
impl CursorRepository for InMemoryCursorRepo {
    async fn get_or_create(&self, source: &str) -> WaybillResult<SyncCursor> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows
            .entry(source.to_owned())
            .or_insert_with(|| blank_cursor(source))
            .clone())
    }

    async fn get(&self, source: &str) -> WaybillResult<Option<SyncCursor>> {
        Ok(self.rows.lock().unwrap().get(source).cloned())
    }

    async fn advance_if_newer(
        &self,
        source: &str,
        cursor_value: &str,
        metadata: Option<&serde_json::Value>,
    ) -> WaybillResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .entry(source.to_owned())
            .or_insert_with(|| blank_cursor(source));
        let newer = row
            .cursor_value
            .as_deref()
            .map_or(true, |current| current < cursor_value);
        if newer {
            row.cursor_value = Some(cursor_value.to_owned());
            row.metadata = metadata.cloned();
            row.last_synced_at = Some(Utc::now());
            row.updated_at = Utc::now();
        }
        Ok(newer)
    }

    async fn reset(&self, source: &str, cursor_value: &str) -> WaybillResult<SyncCursor> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .entry(source.to_owned())
            .or_insert_with(|| blank_cursor(source));
        row.cursor_value = Some(cursor_value.to_owned());
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryJobRepo {
    jobs: Arc<Mutex<HashMap<Uuid, BackfillJob>>>,
}

impl InMemoryJobRepo {
    pub fn insert(&self, job: BackfillJob) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }
}

#[async_trait]
impl BackfillJobRepository for InMemoryJobRepo {
    async fn create(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> WaybillResult<BackfillJob> {
        let now = Utc::now();
        let job = BackfillJob {
            id: Uuid::new_v4(),
            start_date,
            end_date,
            status: JobStatus::Pending,
            orders_total: 0,
            orders_imported: 0,
            orders_failed: 0,
            shipping_total: 0,
            shipping_imported: 0,
            shipping_failed: 0,
            tasks_total: 2,
            tasks_completed: 0,
            tasks_failed: 0,
            error_log: vec![],
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self) -> WaybillResult<Vec<BackfillJob>> {
        let mut jobs: Vec<_> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn mark_in_progress(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::InProgress;
                job.started_at = Some(Utc::now());
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_failed(&self, id: Uuid, error: &JobError) -> WaybillResult<Option<BackfillJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) => {
                job.status = JobStatus::Failed;
                job.error_log.push(error.clone());
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn cancel(&self, id: Uuid) -> WaybillResult<Option<BackfillJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> WaybillResult<bool> {
        Ok(self.jobs.lock().unwrap().remove(&id).is_some())
    }

    async fn record_task_outcome(
        &self,
        id: Uuid,
        source: SyncSource,
        outcome: &TaskOutcome,
    ) -> WaybillResult<Option<BackfillJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => job,
            _ => return Ok(None),
        };

        match source {
            SyncSource::Orders => {
                job.orders_total += outcome.total;
                job.orders_imported += outcome.imported;
                job.orders_failed += outcome.failed;
            }
            SyncSource::Shipping => {
                job.shipping_total += outcome.total;
                job.shipping_imported += outcome.imported;
                job.shipping_failed += outcome.failed;
            }
        }
        match &outcome.error {
            Some(error) => {
                job.tasks_failed += 1;
                job.error_log.push(JobError::new(source, error.clone()));
            }
            None => job.tasks_completed += 1,
        }
        if job.tasks_completed + job.tasks_failed >= job.tasks_total {
            job.status = if job.tasks_failed > 0 {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            job.completed_at = Some(Utc::now());
        }
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    inflight: Arc<Mutex<HashMap<String, Vec<String>>>>,
    fail_queues: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryQueue {
    pub fn fail_enqueue_on(&self, queue: &str) {
        self.fail_queues.lock().unwrap().insert(queue.to_owned());
    }

    pub fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn inflight_len(&self, queue: &str) -> usize {
        self.inflight
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, Vec::len)
    }

    pub fn payloads(&self, queue: &str) -> Vec<serde_json::Value> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| {
                q.iter()
                    .map(|raw| serde_json::from_str(raw).unwrap())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, queue: &str, payload: &serde_json::Value) -> WaybillResult<()> {
        if self.fail_queues.lock().unwrap().contains(queue) {
            return Err(WaybillError::Queue(format!("injected failure on {queue}")));
        }
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_owned())
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn dequeue_batch(&self, queue: &str, max: usize) -> WaybillResult<Vec<QueuedMessage>> {
        let mut queues = self.queues.lock().unwrap();
        let mut inflight = self.inflight.lock().unwrap();
        let pending = queues.entry(queue.to_owned()).or_default();
        let tracked = inflight.entry(queue.to_owned()).or_default();

        let mut messages = Vec::new();
        while messages.len() < max {
            match pending.pop_front() {
                Some(raw) => {
                    tracked.push(raw.clone());
                    messages.push(QueuedMessage {
                        queue: queue.to_owned(),
                        raw,
                    });
                }
                None => break,
            }
        }
        Ok(messages)
    }

    async fn remove_inflight(&self, message: &QueuedMessage) -> WaybillResult<()> {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(tracked) = inflight.get_mut(&message.queue) {
            if let Some(pos) = tracked.iter().position(|raw| *raw == message.raw) {
                tracked.remove(pos);
            }
        }
        Ok(())
    }
}
