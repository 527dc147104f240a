use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::shipment::models::Shipment;
use crate::shipment::repositories::ShipmentRepository;
use waybill_common::error::{WaybillError, WaybillResult};

const SHIPMENT_COLS: &str = "id, external_id, order_number, status, carrier_code, \
     service_code, tracking_number, ship_date, modified_at, raw_ref, created_at, updated_at";

#[derive(Clone)]
pub struct PgShipmentRepository {
    pool: PgPool,
}

impl PgShipmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> WaybillResult<Shipment> {
        Ok(Shipment {
            id: row.get("id"),
            external_id: row.get("external_id"),
            order_number: row.get("order_number"),
            status: row.get("status"),
            carrier_code: row.get("carrier_code"),
            service_code: row.get("service_code"),
            tracking_number: row.get("tracking_number"),
            ship_date: row.get("ship_date"),
            modified_at: row.get("modified_at"),
            raw_ref: row.get("raw_ref"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ShipmentRepository for PgShipmentRepository {
    async fn upsert_by_external_id(&self, shipment: Shipment) -> WaybillResult<Shipment> {
        let row = sqlx::query(&format!(
            "insert into shipments
               (id, external_id, order_number, status, carrier_code,
                service_code, tracking_number, ship_date, modified_at, raw_ref)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             on conflict (external_id) do update set
               order_number = excluded.order_number,
               status = excluded.status,
               carrier_code = excluded.carrier_code,
               service_code = excluded.service_code,
               tracking_number = excluded.tracking_number,
               ship_date = excluded.ship_date,
               modified_at = excluded.modified_at,
               raw_ref = excluded.raw_ref,
               updated_at = now()
             returning {SHIPMENT_COLS}",
        ))
        .bind(shipment.id)
        .bind(&shipment.external_id)
        .bind(&shipment.order_number)
        .bind(&shipment.status)
        .bind(&shipment.carrier_code)
        .bind(&shipment.service_code)
        .bind(&shipment.tracking_number)
        .bind(shipment.ship_date)
        .bind(shipment.modified_at)
        .bind(&shipment.raw_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn get_by_external_id(&self, external_id: &str) -> WaybillResult<Option<Shipment>> {
        let row = sqlx::query(&format!(
            "select {SHIPMENT_COLS} from shipments where external_id = $1",
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WaybillError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }
}
