use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local copy of one shipping-platform shipment. The record sync function is
/// the only writer of these rows during synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub external_id: String,
    pub order_number: Option<String>,
    pub status: Option<String>,
    pub carrier_code: Option<String>,
    pub service_code: Option<String>,
    pub tracking_number: Option<String>,
    pub ship_date: Option<NaiveDate>,
    pub modified_at: DateTime<Utc>,
    pub raw_ref: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
