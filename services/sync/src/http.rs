use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backfill::orchestrator::BackfillOrchestrator;
use crate::error::{ApiError, ApiResult};
use crate::poll::cycle::{PollConfig, SHIPPING_CURSOR};
use crate::poll::scheduler::PollControl;
use waybill_common::error::WaybillError;
use waybill_common::types::ServiceInfo;
use waybill_db::backfill::models::BackfillJob;
use waybill_db::cursor::models::format_cursor;
use waybill_db::cursor::repositories::CursorRepository;

#[derive(Clone)]
pub struct AppState {
    /// Absent when the shipping platform credentials are not configured.
    pub poll: Option<Arc<dyn PollControl>>,
    pub cursors: Arc<dyn CursorRepository>,
    pub orchestrator: Arc<BackfillOrchestrator>,
    pub poll_config: PollConfig,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info_handler))
        .route("/metrics", get(metrics))
        .route("/sync/status", get(sync_status))
        .route("/sync/trigger", post(sync_trigger))
        .route("/sync/resync", post(sync_resync))
        .route("/webhooks/shipments", post(shipment_webhook))
        .route("/backfill", post(create_backfill).get(list_backfills))
        .route("/backfill/{id}", get(get_backfill).delete(delete_backfill))
        .route("/backfill/{id}/cancel", post(cancel_backfill))
        .route("/backfill/{id}/restart", post(restart_backfill))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info_handler() -> Json<ServiceInfo> {
    Json(ServiceInfo::new("waybill-sync"))
}

async fn metrics(State(state): State<AppState>) -> String {
    let stats = state
        .poll
        .as_ref()
        .map(|poll| poll.stats())
        .unwrap_or_default();
    format!(
        "# TYPE waybill_up gauge\n\
         waybill_up 1\n\
         # TYPE waybill_poll_cycles_total counter\n\
         waybill_poll_cycles_total {}\n\
         # TYPE waybill_poll_cycles_failed_total counter\n\
         waybill_poll_cycles_failed_total {}\n\
         # TYPE waybill_poll_records_processed_total counter\n\
         waybill_poll_records_processed_total {}\n\
         # TYPE waybill_poll_records_errored_total counter\n\
         waybill_poll_records_errored_total {}\n\
         # TYPE waybill_poll_triggers_ignored_total counter\n\
         waybill_poll_triggers_ignored_total {}\n",
        stats.cycles_completed,
        stats.cycles_failed,
        stats.records_processed,
        stats.records_errored,
        stats.triggers_ignored,
    )
}

async fn sync_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let cursor = state.cursors.get(SHIPPING_CURSOR).await?;
    let body = match &state.poll {
        Some(poll) => serde_json::json!({
            "configured": true,
            "polling": poll.is_polling(),
            "stats": poll.stats(),
            "cursor": cursor,
        }),
        None => serde_json::json!({ "configured": false, "cursor": cursor }),
    };
    Ok(Json(body))
}

async fn sync_trigger(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let poll = state.poll.as_ref().ok_or_else(|| {
        ApiError(WaybillError::Validation(
            "shipping platform is not configured".to_owned(),
        ))
    })?;
    poll.trigger_immediate_poll();
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "triggered": true })),
    ))
}

/// Rewinds the cursor by the full lookback window and kicks a poll, so
/// the next cycles re-walk recent history.
async fn sync_resync(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let start = Utc::now() - Duration::hours(state.poll_config.lookback_hours);
    let value = format_cursor(start);
    state.cursors.reset(SHIPPING_CURSOR, &value).await?;
    info!(cursor = %value, "cursor rewound for full resync");
    if let Some(poll) = &state.poll {
        poll.trigger_immediate_poll();
    }
    Ok(Json(serde_json::json!({ "reset_to": value })))
}

/// Shipment webhooks are treated as a hint, not a payload: any delivery
/// just schedules an immediate poll.
async fn shipment_webhook(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match &state.poll {
        Some(poll) => {
            info!("shipment webhook received, scheduling poll");
            poll.trigger_immediate_poll();
        }
        None => warn!("shipment webhook received but poller is not configured"),
    }
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "received": true })),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateBackfillRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

async fn create_backfill(
    State(state): State<AppState>,
    Json(req): Json<CreateBackfillRequest>,
) -> ApiResult<(StatusCode, Json<BackfillJob>)> {
    let job = state
        .orchestrator
        .create_job(req.start_date, req.end_date)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_backfills(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let jobs = state.orchestrator.list_jobs().await?;
    Ok(Json(serde_json::json!({
        "count": jobs.len(),
        "data": jobs,
    })))
}

async fn get_backfill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BackfillJob>> {
    Ok(Json(state.orchestrator.get_job(id).await?))
}

async fn cancel_backfill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BackfillJob>> {
    Ok(Json(state.orchestrator.cancel_job(id).await?))
}

async fn restart_backfill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<BackfillJob>)> {
    let job = state.orchestrator.restart_job(id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn delete_backfill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.orchestrator.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
