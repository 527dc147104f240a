use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::shipping::models::ShipmentPage;
use waybill_config::env::{parse_var_or, var_or};

#[derive(Debug, Error)]
pub enum ShippingClientError {
    /// The platform returned 429. Callers decide whether to truncate the
    /// cycle or re-enqueue the task; the client never sleeps it off.
    #[error("shipping platform rate limit hit")]
    RateLimited,
    #[error("shipping API error ({status}): {body}")]
    HttpError { status: StatusCode, body: String },
    #[error("shipping request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("shipping request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

#[derive(Debug, Clone)]
pub struct ShippingClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl ShippingClientConfig {
    /// Returns `None` when the platform credentials are absent, in which
    /// case continuous sync stays disabled and backfill tasks for this
    /// source resolve as not-configured.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("SHIPPING_API_KEY").ok()?;
        let api_secret = std::env::var("SHIPPING_API_SECRET").ok()?;
        let base_url = var_or("SHIPPING_BASE_URL", "https://ssapi.shipstation.com");

        Some(Self {
            base_url,
            api_key,
            api_secret,
            page_size: parse_var_or("SHIPPING_PAGE_SIZE", 100),
            max_retries: parse_var_or("SHIPPING_MAX_RETRIES", 3),
            timeout_secs: parse_var_or("SHIPPING_TIMEOUT_SECS", 30),
        })
    }
}

#[derive(Clone)]
pub struct ShippingClient {
    client: reqwest::Client,
    config: ShippingClientConfig,
}

impl ShippingClient {
    pub fn new(config: ShippingClientConfig) -> Result<Self, ShippingClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    pub fn config(&self) -> &ShippingClientConfig {
        &self.config
    }

    /// One page of shipments modified at or after `modified_since`, sorted
    /// ascending by modify date. Pages are 1-based.
    pub async fn fetch_modified_page(
        &self,
        modified_since: DateTime<Utc>,
        page: u32,
    ) -> Result<ShipmentPage, ShippingClientError> {
        let params = [
            (
                "modifyDateStart",
                modified_since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("sortBy", "ModifyDate".to_owned()),
            ("sortDir", "ASC".to_owned()),
            ("page", page.to_string()),
            ("pageSize", self.config.page_size.to_string()),
        ];
        self.get_shipments(&params).await
    }

    /// One page of shipments created inside a closed date range, used by
    /// backfill fetch tasks.
    pub async fn fetch_range_page(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        page: u32,
    ) -> Result<ShipmentPage, ShippingClientError> {
        let params = [
            ("createDateStart", format!("{start_date}T00:00:00Z")),
            ("createDateEnd", format!("{end_date}T23:59:59Z")),
            ("sortBy", "CreateDate".to_owned()),
            ("sortDir", "ASC".to_owned()),
            ("page", page.to_string()),
            ("pageSize", self.config.page_size.to_string()),
        ];
        self.get_shipments(&params).await
    }

    async fn get_shipments(
        &self,
        params: &[(&str, String)],
    ) -> Result<ShipmentPage, ShippingClientError> {
        let url = format!("{}/shipments", self.config.base_url);
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retries {
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
                .query(params)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let page = resp.json::<ShipmentPage>().await?;
                        debug!(
                            count = page.shipments.len(),
                            page = page.page,
                            pages = page.pages,
                            "fetched shipment page"
                        );
                        return Ok(page);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(ShippingClientError::RateLimited);
                    }
                    let body = resp.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        last_error = format!("{status}: {body}");
                        warn!(attempt, %status, "shipping API server error, retrying");
                    } else {
                        // 4xx other than 429 will not improve with retries
                        return Err(ShippingClientError::HttpError { status, body });
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_error = e.to_string();
                    warn!(attempt, error = %e, "shipping request failed, retrying");
                }
                Err(e) => return Err(ShippingClientError::RequestError(e)),
            }

            if attempt < self.config.max_retries {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(ShippingClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries,
            last_error,
        })
    }
}
