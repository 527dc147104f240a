use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One shipment as returned by the shipping platform's list API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingShipment {
    pub shipment_id: i64,
    pub order_number: Option<String>,
    pub shipment_status: Option<String>,
    pub carrier_code: Option<String>,
    pub service_code: Option<String>,
    pub tracking_number: Option<String>,
    pub ship_date: Option<NaiveDate>,
    pub create_date: Option<DateTime<Utc>>,
    /// Pages are sorted ascending by this field; the poll cycle's cursor
    /// arithmetic depends on that ordering.
    pub modify_date: DateTime<Utc>,
}

/// One page of the shipment list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentPage {
    pub shipments: Vec<ShippingShipment>,
    pub total: u64,
    pub page: u32,
    pub pages: u32,
}

impl ShipmentPage {
    pub fn has_more(&self) -> bool {
        self.page < self.pages
    }
}
