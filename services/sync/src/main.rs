mod backfill;
mod error;
mod http;
mod ingest;
mod notify;
mod orders;
mod poll;
mod queue;
mod shipping;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backfill::orchestrator::BackfillOrchestrator;
use crate::backfill::worker::{BackfillWorker, WorkerConfig};
use crate::http::{build_router, AppState};
use crate::ingest::ShipmentIngestor;
use crate::notify::UpdateBroadcaster;
use crate::orders::client::{OrdersClient, OrdersClientConfig};
use crate::poll::cycle::{PollConfig, PollCycle};
use crate::poll::scheduler::{PollControl, PollScheduler};
use crate::queue::{RedisTaskQueue, TaskQueue};
use crate::shipping::client::{ShippingClient, ShippingClientConfig};
use waybill_config::{init_tracing, AppConfig};
use waybill_db::backfill::pg_repository::PgBackfillJobRepository;
use waybill_db::backfill::repositories::BackfillJobRepository;
use waybill_db::cursor::pg_repository::PgCursorRepository;
use waybill_db::shipment::pg_repository::PgShipmentRepository;

type ShippingPollScheduler =
    PollScheduler<PollCycle<PgCursorRepository, PgShipmentRepository>>;

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);
    info!(service = "waybill-sync", "starting");

    let pool = match waybill_db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "database connection failed");
            std::process::exit(1);
        }
    };
    let queue: Arc<dyn TaskQueue> = match RedisTaskQueue::connect(&config.redis_url).await {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!(error = %e, "redis connection failed");
            std::process::exit(1);
        }
    };

    let updates = UpdateBroadcaster::new(256);
    let cursors = PgCursorRepository::new(pool.clone());
    let jobs: Arc<dyn BackfillJobRepository> =
        Arc::new(PgBackfillJobRepository::new(pool.clone()));
    let poll_config = PollConfig::from_env();

    let shipping_config = ShippingClientConfig::from_env();
    let scheduler: Option<Arc<ShippingPollScheduler>> = match shipping_config.clone() {
        Some(cfg) => match ShippingClient::new(cfg) {
            Ok(client) => {
                let ingestor = ShipmentIngestor::new(
                    PgShipmentRepository::new(pool.clone()),
                    updates.clone(),
                );
                let cycle =
                    PollCycle::new(client, cursors.clone(), ingestor, poll_config.clone());
                let scheduler = Arc::new(PollScheduler::new(cycle, &poll_config));
                scheduler.start();
                // first sweep right away instead of waiting out an interval
                scheduler.trigger_immediate_poll();
                Some(scheduler)
            }
            Err(e) => {
                error!(error = %e, "failed to build shipping client");
                None
            }
        },
        None => {
            warn!("shipping credentials not set, continuous sync disabled");
            None
        }
    };

    let orders_client = OrdersClientConfig::from_env().and_then(|cfg| {
        match OrdersClient::new(cfg) {
            Ok(client) => Some(client),
            Err(e) => {
                error!(error = %e, "failed to build orders client");
                None
            }
        }
    });
    if orders_client.is_none() {
        warn!("orders credentials not set, orders backfill tasks will fail as not configured");
    }
    let worker_shipping = shipping_config.and_then(|cfg| ShippingClient::new(cfg).ok());

    let worker = BackfillWorker::new(
        jobs.clone(),
        queue.clone(),
        orders_client,
        worker_shipping,
        updates.clone(),
        WorkerConfig::default(),
    );
    let worker_shutdown = CancellationToken::new();
    let worker_handle = {
        let token = worker_shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    let orchestrator = Arc::new(BackfillOrchestrator::new(jobs, queue, updates));
    let state = AppState {
        poll: scheduler
            .clone()
            .map(|s| s as Arc<dyn PollControl>),
        cursors: Arc::new(cursors),
        orchestrator,
        poll_config,
    };
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(%addr, "listening");

    let shutdown = {
        let scheduler = scheduler.clone();
        let worker_shutdown = worker_shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            if let Some(scheduler) = scheduler {
                scheduler.stop();
            }
            worker_shutdown.cancel();
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "server error");
    }
    let _ = worker_handle.await;
    info!("waybill-sync stopped");
}
