use async_trait::async_trait;

use crate::shipment::models::Shipment;
use waybill_common::error::WaybillResult;

#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    /// Idempotent upsert keyed on the platform's shipment id.
    async fn upsert_by_external_id(&self, shipment: Shipment) -> WaybillResult<Shipment>;

    async fn get_by_external_id(&self, external_id: &str) -> WaybillResult<Option<Shipment>>;
}
