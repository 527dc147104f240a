use chrono::Utc;
use uuid::Uuid;

use crate::notify::{UpdateBroadcaster, UpdateEvent};
use crate::shipping::models::ShippingShipment;
use waybill_common::error::WaybillResult;
use waybill_db::shipment::models::Shipment;
use waybill_db::shipment::repositories::ShipmentRepository;

/// Maps a platform shipment onto our row shape. The upsert key is the
/// platform's numeric id rendered as text.
pub fn shipment_to_row(record: &ShippingShipment) -> Shipment {
    let now = Utc::now();
    Shipment {
        id: Uuid::new_v4(),
        external_id: record.shipment_id.to_string(),
        order_number: record.order_number.clone(),
        status: record.shipment_status.clone(),
        carrier_code: record.carrier_code.clone(),
        service_code: record.service_code.clone(),
        tracking_number: record.tracking_number.clone(),
        ship_date: record.ship_date,
        modified_at: record.modify_date,
        raw_ref: serde_json::to_value(record).ok(),
        created_at: now,
        updated_at: now,
    }
}

/// Persists polled shipment records and announces each success to live
/// subscribers.
pub struct ShipmentIngestor<R> {
    repo: R,
    updates: UpdateBroadcaster,
}

impl<R: ShipmentRepository> ShipmentIngestor<R> {
    pub fn new(repo: R, updates: UpdateBroadcaster) -> Self {
        Self { repo, updates }
    }

    pub async fn sync_record(&self, record: &ShippingShipment) -> WaybillResult<()> {
        let row = shipment_to_row(record);
        let external_id = row.external_id.clone();
        self.repo.upsert_by_external_id(row).await?;
        self.updates
            .broadcast(UpdateEvent::ShipmentSynced { external_id });
        Ok(())
    }
}
