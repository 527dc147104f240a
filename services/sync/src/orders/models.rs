use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An order summary as returned by the orders platform. Only the fields
/// the fetch task forwards downstream are decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    pub order_number: Option<String>,
    pub status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<OrderRecord>,
    pub next_page_token: Option<String>,
}
