use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backfill::task::FetchTask;
use crate::notify::{UpdateBroadcaster, UpdateEvent};
use crate::orders::client::{OrdersClient, OrdersClientError};
use crate::queue::{QueuedMessage, TaskQueue, FETCH_QUEUE, ORDER_SYNC_QUEUE, SHIPMENT_SYNC_QUEUE};
use crate::shipping::client::{ShippingClient, ShippingClientError};
use waybill_common::error::WaybillResult;
use waybill_common::types::SyncSource;
use waybill_db::backfill::models::{BackfillJob, JobStatus, TaskOutcome};
use waybill_db::backfill::repositories::BackfillJobRepository;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_secs: u64,
    pub batch_size: usize,
    /// Pause between order pages, keeping backfill traffic under the
    /// platform's rate budget.
    pub orders_page_delay_ms: u64,
    pub shipping_page_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            batch_size: 4,
            orders_page_delay_ms: 500,
            shipping_page_delay_ms: 1500,
        }
    }
}

/// How one fetch task resolved.
enum TaskResolution {
    /// Terminal: record the outcome against the job.
    Report(TaskOutcome),
    /// Transient: put the task back on the queue for a later tick.
    Retry(String),
    /// The job is gone or terminal; nothing to record.
    Skip(String),
}

/// Drains fetch tasks off the durable queue, walks the platform APIs for
/// each, and reports outcomes back onto the job row. Messages leave the
/// in-flight list only after a terminal resolution or an explicit
/// re-enqueue.
pub struct BackfillWorker {
    jobs: Arc<dyn BackfillJobRepository>,
    queue: Arc<dyn TaskQueue>,
    orders: Option<OrdersClient>,
    shipping: Option<ShippingClient>,
    updates: UpdateBroadcaster,
    config: WorkerConfig,
}

impl BackfillWorker {
    pub fn new(
        jobs: Arc<dyn BackfillJobRepository>,
        queue: Arc<dyn TaskQueue>,
        orders: Option<OrdersClient>,
        shipping: Option<ShippingClient>,
        updates: UpdateBroadcaster,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            queue,
            orders,
            shipping,
            updates,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_secs = self.config.tick_secs,
            batch_size = self.config.batch_size,
            "backfill worker started"
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("backfill worker stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            match self.process_batch().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "processed fetch tasks"),
                Err(e) => error!(error = %e, "fetch task batch failed"),
            }
        }
    }

    /// Drains up to one batch of fetch tasks. Returns how many messages
    /// were dequeued.
    pub async fn process_batch(&self) -> WaybillResult<usize> {
        let messages = self
            .queue
            .dequeue_batch(FETCH_QUEUE, self.config.batch_size)
            .await?;
        let count = messages.len();
        for message in messages {
            self.handle_message(message).await;
        }
        Ok(count)
    }

    async fn handle_message(&self, message: QueuedMessage) {
        let task: FetchTask = match message.payload() {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "dropping malformed fetch task");
                self.ack(&message).await;
                return;
            }
        };

        match self.resolve_task(&task).await {
            TaskResolution::Report(outcome) => {
                match self
                    .jobs
                    .record_task_outcome(task.job_id, task.source, &outcome)
                    .await
                {
                    Ok(Some(job)) => {
                        info!(
                            job_id = %task.job_id,
                            source = %task.source,
                            status = job.status.as_str(),
                            total = outcome.total,
                            "recorded fetch task outcome"
                        );
                        self.announce(&job);
                    }
                    Ok(None) => {
                        info!(job_id = %task.job_id, "job already terminal, outcome discarded");
                    }
                    Err(e) => {
                        error!(job_id = %task.job_id, error = %e, "outcome write failed, re-enqueueing task");
                        if !self.requeue(&task).await {
                            return;
                        }
                    }
                }
            }
            TaskResolution::Retry(reason) => {
                info!(job_id = %task.job_id, source = %task.source, reason = %reason, "re-enqueueing fetch task");
                if !self.requeue(&task).await {
                    return;
                }
            }
            TaskResolution::Skip(reason) => {
                info!(job_id = %task.job_id, source = %task.source, reason = %reason, "skipping fetch task");
            }
        }

        self.ack(&message).await;
    }

    async fn resolve_task(&self, task: &FetchTask) -> TaskResolution {
        let job = match self.jobs.get(task.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return TaskResolution::Skip("job no longer exists".to_owned()),
            Err(e) => return TaskResolution::Retry(format!("job lookup failed: {e}")),
        };
        if job.status.is_terminal() {
            return TaskResolution::Skip(format!("job is {}", job.status.as_str()));
        }
        if job.status == JobStatus::Pending {
            match self.jobs.mark_in_progress(job.id).await {
                Ok(Some(started)) => self.announce(&started),
                // the other source's task won the transition
                Ok(None) => {}
                Err(e) => return TaskResolution::Retry(format!("job transition failed: {e}")),
            }
        }

        match task.source {
            SyncSource::Orders => self.fetch_orders(task).await,
            SyncSource::Shipping => self.fetch_shipments(task).await,
        }
    }

    async fn fetch_orders(&self, task: &FetchTask) -> TaskResolution {
        let client = match &self.orders {
            Some(client) => client,
            None => {
                return TaskResolution::Report(TaskOutcome::errored(
                    "orders platform not configured",
                ))
            }
        };

        let (mut total, mut imported, mut failed) = (0i32, 0i32, 0i32);
        let mut token: Option<String> = None;
        loop {
            let page = match client
                .fetch_page(task.start_date, task.end_date, token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(OrdersClientError::RateLimited) => {
                    return TaskResolution::Retry("orders platform rate limit".to_owned())
                }
                Err(e) => return TaskResolution::Report(TaskOutcome::errored(e.to_string())),
            };

            for order in &page.orders {
                total += 1;
                let reference = serde_json::json!({
                    "orderId": order.order_id,
                    "orderNumber": order.order_number,
                    "jobId": task.job_id,
                });
                match self.queue.enqueue(ORDER_SYNC_QUEUE, &reference).await {
                    Ok(()) => imported += 1,
                    Err(e) => {
                        warn!(order_id = %order.order_id, error = %e, "order reference enqueue failed");
                        failed += 1;
                    }
                }
            }

            token = page.next_page_token;
            if token.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(self.config.orders_page_delay_ms)).await;
            if self.job_halted(task.job_id).await {
                return TaskResolution::Skip("job halted mid-task".to_owned());
            }
        }

        TaskResolution::Report(TaskOutcome::succeeded(total, imported, failed))
    }

    async fn fetch_shipments(&self, task: &FetchTask) -> TaskResolution {
        let client = match &self.shipping {
            Some(client) => client,
            None => {
                return TaskResolution::Report(TaskOutcome::errored(
                    "shipping platform not configured",
                ))
            }
        };

        let (mut total, mut imported, mut failed) = (0i32, 0i32, 0i32);
        let mut page_num = 1u32;
        loop {
            let page = match client
                .fetch_range_page(task.start_date, task.end_date, page_num)
                .await
            {
                Ok(page) => page,
                Err(ShippingClientError::RateLimited) => {
                    return TaskResolution::Retry("shipping platform rate limit".to_owned())
                }
                Err(e) => return TaskResolution::Report(TaskOutcome::errored(e.to_string())),
            };

            for shipment in &page.shipments {
                total += 1;
                let reference = serde_json::json!({
                    "shipmentId": shipment.shipment_id,
                    "orderNumber": shipment.order_number,
                    "jobId": task.job_id,
                });
                match self.queue.enqueue(SHIPMENT_SYNC_QUEUE, &reference).await {
                    Ok(()) => imported += 1,
                    Err(e) => {
                        warn!(shipment_id = shipment.shipment_id, error = %e, "shipment reference enqueue failed");
                        failed += 1;
                    }
                }
            }

            if !page.has_more() {
                break;
            }
            page_num += 1;
            tokio::time::sleep(Duration::from_millis(self.config.shipping_page_delay_ms)).await;
            if self.job_halted(task.job_id).await {
                return TaskResolution::Skip("job halted mid-task".to_owned());
            }
        }

        TaskResolution::Report(TaskOutcome::succeeded(total, imported, failed))
    }

    /// Cancellation check at page boundaries. A lookup error errs on the
    /// side of continuing; the status guard discards late reports anyway.
    async fn job_halted(&self, id: Uuid) -> bool {
        matches!(
            self.jobs.get(id).await,
            Ok(Some(job)) if job.status.is_terminal()
        )
    }

    async fn ack(&self, message: &QueuedMessage) {
        if let Err(e) = self.queue.remove_inflight(message).await {
            error!(queue = %message.queue, error = %e, "in-flight removal failed");
        }
    }

    /// Puts the task back on the fetch queue. Returns `false` when the
    /// write failed; the caller must then leave the message in flight so
    /// the task survives somewhere recoverable.
    async fn requeue(&self, task: &FetchTask) -> bool {
        let payload = match serde_json::to_value(task) {
            Ok(payload) => payload,
            Err(e) => {
                error!(job_id = %task.job_id, error = %e, "fetch task re-encoding failed, leaving it in flight");
                return false;
            }
        };
        match self.queue.enqueue(FETCH_QUEUE, &payload).await {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %task.job_id, error = %e, "fetch task re-enqueue failed, leaving it in flight");
                false
            }
        }
    }

    fn announce(&self, job: &BackfillJob) {
        self.updates.broadcast(UpdateEvent::JobUpdated {
            job_id: job.id,
            status: job.status.as_str().to_owned(),
        });
    }
}
