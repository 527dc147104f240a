use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use waybill_common::types::SyncSource;

/// The unit the orchestrator fans out: one source, one date range, one
/// job. Serialized as the queue payload, so the field names are part of
/// the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTask {
    pub job_id: Uuid,
    pub source: SyncSource,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}
