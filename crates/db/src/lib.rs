pub mod backfill;
pub mod cursor;
pub mod shipment;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use waybill_common::error::{WaybillError, WaybillResult};

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> WaybillResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))
}
