use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ingest::ShipmentIngestor;
use crate::shipping::client::{ShippingClient, ShippingClientError};
use waybill_common::error::{WaybillError, WaybillResult};
use waybill_config::env::parse_var_or;
use waybill_db::cursor::models::format_cursor;
use waybill_db::cursor::repositories::CursorRepository;
use waybill_db::shipment::repositories::ShipmentRepository;

/// Cursor stream name for the shipping platform poller.
pub const SHIPPING_CURSOR: &str = "shipping";

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub catchup_delay_ms: u64,
    pub max_pages_per_poll: u32,
    pub lookback_hours: i64,
    pub safety_overlap_secs: i64,
    pub failure_rewind_secs: i64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            catchup_delay_ms: 1000,
            max_pages_per_poll: 5,
            lookback_hours: 24,
            safety_overlap_secs: 30,
            failure_rewind_secs: 1,
        }
    }
}

impl PollConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_secs: parse_var_or("POLL_INTERVAL_SECS", defaults.interval_secs),
            catchup_delay_ms: parse_var_or("POLL_CATCHUP_DELAY_MS", defaults.catchup_delay_ms),
            max_pages_per_poll: parse_var_or("POLL_MAX_PAGES", defaults.max_pages_per_poll),
            lookback_hours: parse_var_or("POLL_LOOKBACK_HOURS", defaults.lookback_hours),
            ..defaults
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn catchup_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.catchup_delay_ms)
    }
}

/// Report for one completed poll cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollOutcome {
    pub processed: usize,
    pub errored: usize,
    pub pages_processed: u32,
    /// The persisted cursor value, set only when the cursor actually moved.
    pub new_cursor: Option<String>,
    /// True when the page cap truncated the cycle and more data is waiting.
    pub has_more_pages: bool,
    pub hit_rate_limit: bool,
}

/// One incremental sweep of the shipping platform: fetch pages modified
/// since the cursor, upsert each record, then advance the cursor by the
/// policy below.
///
/// Cursor policy, in order:
/// - nothing synced (empty window, or every record failed): no advance;
/// - any record failed: cap the candidate just before the earliest
///   failure so the next cycle retries it;
/// - clean cycle: latest modify date, minus a safety overlap unless the
///   cycle was truncated (page cap or rate limit) and is still catching
///   up.
pub struct PollCycle<C, R> {
    client: ShippingClient,
    cursors: C,
    ingestor: ShipmentIngestor<R>,
    config: PollConfig,
}

impl<C, R> PollCycle<C, R>
where
    C: CursorRepository,
    R: ShipmentRepository,
{
    pub fn new(
        client: ShippingClient,
        cursors: C,
        ingestor: ShipmentIngestor<R>,
        config: PollConfig,
    ) -> Self {
        Self {
            client,
            cursors,
            ingestor,
            config,
        }
    }

    pub async fn run(&self) -> WaybillResult<PollOutcome> {
        let cursor = self.cursors.get_or_create(SHIPPING_CURSOR).await?;
        let since = match cursor.position() {
            Some(ts) => ts,
            None => {
                let start = Utc::now() - Duration::hours(self.config.lookback_hours);
                self.cursors
                    .reset(SHIPPING_CURSOR, &format_cursor(start))
                    .await?;
                info!(
                    cursor = %format_cursor(start),
                    "initialized shipping cursor from lookback window"
                );
                start
            }
        };

        let mut outcome = PollOutcome::default();
        let mut latest_success: Option<DateTime<Utc>> = None;
        let mut earliest_failure: Option<DateTime<Utc>> = None;

        let mut page = 1u32;
        loop {
            let fetched = match self.client.fetch_modified_page(since, page).await {
                Ok(p) => p,
                Err(ShippingClientError::RateLimited) => {
                    info!(page, "rate limited, truncating poll cycle");
                    outcome.hit_rate_limit = true;
                    break;
                }
                Err(e) if page == 1 => return Err(WaybillError::Upstream(e.to_string())),
                Err(e) => {
                    // Partial progress still counts; keep what we have and
                    // let the next cycle pick up from the advanced cursor.
                    warn!(page, error = %e, "page fetch failed, truncating poll cycle");
                    outcome.has_more_pages = true;
                    break;
                }
            };

            outcome.pages_processed += 1;
            for record in &fetched.shipments {
                match self.ingestor.sync_record(record).await {
                    Ok(()) => {
                        outcome.processed += 1;
                        latest_success = Some(
                            latest_success.map_or(record.modify_date, |t| t.max(record.modify_date)),
                        );
                    }
                    Err(e) => {
                        warn!(
                            shipment_id = record.shipment_id,
                            error = %e,
                            "failed to sync shipment"
                        );
                        outcome.errored += 1;
                        earliest_failure = Some(
                            earliest_failure
                                .map_or(record.modify_date, |t| t.min(record.modify_date)),
                        );
                    }
                }
            }

            if !fetched.has_more() {
                break;
            }
            if page >= self.config.max_pages_per_poll {
                outcome.has_more_pages = true;
                break;
            }
            page += 1;
        }

        let candidate = match (latest_success, earliest_failure) {
            (None, _) => None,
            (Some(_), Some(failed_at)) => {
                Some(failed_at - Duration::seconds(self.config.failure_rewind_secs))
            }
            (Some(latest), None) if outcome.has_more_pages || outcome.hit_rate_limit => {
                // still catching up, the overlap would only re-fetch
                Some(latest)
            }
            (Some(latest), None) => {
                Some(latest - Duration::seconds(self.config.safety_overlap_secs))
            }
        };

        if let Some(ts) = candidate {
            let value = format_cursor(ts);
            let metadata = serde_json::json!({
                "last_cycle": {
                    "processed": outcome.processed,
                    "errored": outcome.errored,
                    "pages": outcome.pages_processed,
                }
            });
            let advanced = self
                .cursors
                .advance_if_newer(SHIPPING_CURSOR, &value, Some(&metadata))
                .await?;
            if advanced {
                outcome.new_cursor = Some(value);
            } else {
                debug!(candidate = %value, "cursor unchanged, candidate is not newer");
            }
        }

        info!(
            processed = outcome.processed,
            errored = outcome.errored,
            pages = outcome.pages_processed,
            new_cursor = outcome.new_cursor.as_deref().unwrap_or("unchanged"),
            "poll cycle finished"
        );
        Ok(outcome)
    }
}
